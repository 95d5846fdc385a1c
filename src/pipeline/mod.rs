//! Pipeline stages for document normalisation.
//!
//! Each submodule implements one step and can be tested on its own; the
//! batch driver in [`crate::batch`] strings them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ filename ──▶ orientation ──▶ page_key ──▶ group ──▶ merge
//! (intake)  (repair)     (EXIF/OSD)      (markers)   (order)   (pdfium)
//! ```
//!
//! 1. [`input`]       allow-list, size and content checks; stage to disk
//! 2. [`filename`]    undo mojibake and restore cosmetic formatting
//! 3. [`orientation`] bring rasters upright; OCR is only a signal here
//! 4. [`page_key`]    split a stem into base key and page number
//! 5. [`group`]       partition by base key, stable page order
//! 6. [`merge`]       concatenate a group into one PDF via [`pdf`]
//!
//! [`encode`] is shared PNG plumbing.

pub mod encode;
pub mod filename;
pub mod group;
pub mod input;
pub mod merge;
pub mod orientation;
pub mod page_key;
pub mod pdf;
