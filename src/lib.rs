// SPDX-License-Identifier: MIT OR Apache-2.0

//! counterd ingests typed event messages ("facts") over HTTP, persists each
//! fact together with derived content-addressed index entries in a document
//! store, and evaluates a configurable set of aggregation counters per fact.
//!
//! The crate is organized around the ingest path:
//!
//! - [`core::config`] loads and validates the three declarative catalogs
//!   (fields, indexes, counters) plus runtime settings,
//! - [`core::mapper`] rewrites predicates and pipelines between long logical
//!   field names and short wire names,
//! - [`core::fact`] normalizes inbound messages and derives index entries,
//! - [`core::predicate`] evaluates counter conditions locally against a fact,
//! - [`core::counter`] selects applicable counters and synthesizes the
//!   per-fact `$facet` aggregation,
//! - [`core::store`] is the gateway to the document store,
//! - [`core::ingest`] drives the per-request pipeline,
//! - [`server`] exposes the HTTP surface.

pub mod core;
pub mod server;
