//! # scribe-core — Changeset algebra for collaborative plain-text pads
//!
//! A document is an [`AText`]: text ending in `\n` plus an attribution
//! string whose ops reference an [`AttributePool`]. Every edit is a
//! [`Changeset`] against a text of known length.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   "Z:5>3…$abc"  │  Changeset   │  unpack / pack / check_rep
//!  ─────────────► │  (parsed)    │
//!                 └──────┬───────┘
//!                        │
//!       ┌────────────────┼─────────────────┐
//!       ▼                ▼                 ▼
//! ┌───────────┐   ┌─────────────┐   ┌─────────────┐
//! │ apply_*   │   │ compose     │   │ inverse     │
//! │ text /    │   │ follow      │   │ make_splice │
//! │ attribs / │   │ (zip over   │   │ Builder     │
//! │ lines     │   │  op streams)│   │             │
//! └───────────┘   └──────┬──────┘   └─────────────┘
//!                        │
//!                ┌───────┴────────┐
//!                │ AttributePool  │  (key, value) ⇄ index
//!                └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`op`] — ops and their wire grammar
//! - [`assembler`] — op writers, including canonical ordering
//! - [`changeset`] — pack, unpack, apply, compose, follow, splice
//! - [`inverse`] — undo changesets
//! - [`mutator`] — in-place editing of line arrays
//! - [`atext`] — attributed text and per-line attribution
//! - [`pool`], [`attribute_map`], [`attribs`] — attributes
//!
//! All lengths count Unicode scalar values. Nothing here performs I/O.

pub mod assembler;
pub mod atext;
pub mod attribs;
pub mod attribute;
pub mod attribute_map;
pub mod base36;
pub mod builder;
pub mod changeset;
pub mod cursor;
pub mod error;
pub mod inverse;
pub mod mutator;
pub mod op;
pub mod pool;

pub use assembler::{MergingOpAssembler, OpAssembler, SmartOpAssembler};
pub use atext::{
    join_attribution_lines, make_attribution, ops_from_atext, split_attribution_lines,
    split_text_lines, AText,
};
pub use attribs::{
    attribs_for_op, compose_attributes, decode_attribs, encode_attribs, follow_attributes,
    AttributeTester,
};
pub use attribute::Attribute;
pub use attribute_map::AttributeMap;
pub use builder::Builder;
pub use changeset::{
    apply_to_atext, apply_to_attribution, apply_to_text, check_rep, compose, follow,
    make_splice, move_attribs_to_new_pool, move_ops_to_new_pool, mutate_attribution_lines,
    mutate_text_lines, prepare_for_wire, Changeset,
};
pub use error::{ChangesetError, Result};
pub use inverse::inverse;
pub use mutator::TextLinesMutator;
pub use op::{ops_from_text, parse_ops, serialize_ops, Op, OpKind};
pub use pool::{AttributePool, PoolJson};
