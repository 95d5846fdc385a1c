//! Document grouping: partition a batch by base key and order the pages.

use crate::pipeline::page_key::PageKey;
use std::collections::HashMap;

/// One page of a group with the page number it was filed under.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMember<P> {
    pub page: P,
    pub page_number: Option<u32>,
}

/// All pages sharing one `base_key`, in final output order.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentGroup<P> {
    pub base_key: String,
    pub members: Vec<GroupMember<P>>,
}

impl<P> DocumentGroup<P> {
    /// A single-member group is emitted without a merge step.
    pub fn is_passthrough(&self) -> bool {
        self.members.len() == 1
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Page numbers in member order, for logging and tests.
    pub fn page_numbers(&self) -> Vec<Option<u32>> {
        self.members.iter().map(|m| m.page_number).collect()
    }
}

/// Group `(key, page)` pairs by exact `base_key`.
///
/// Groups come out in order of first appearance. Within a group of two or
/// more, members are stably sorted by page number with `None` ranked as 0, so
/// equal numbers keep their batch order.
pub fn group_pages<P, I>(items: I) -> Vec<DocumentGroup<P>>
where
    I: IntoIterator<Item = (PageKey, P)>,
{
    let mut groups: Vec<DocumentGroup<P>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (key, page) in items {
        let member = GroupMember {
            page,
            page_number: key.page_number,
        };
        match index.get(&key.base_key) {
            Some(&i) => groups[i].members.push(member),
            None => {
                index.insert(key.base_key.clone(), groups.len());
                groups.push(DocumentGroup {
                    base_key: key.base_key,
                    members: vec![member],
                });
            }
        }
    }

    for group in groups.iter_mut().filter(|g| g.members.len() > 1) {
        // `sort_by_key` is stable.
        group.members.sort_by_key(|m| m.page_number.unwrap_or(0));
    }

    groups
}
