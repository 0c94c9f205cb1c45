// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod config;
pub mod counter;
pub mod error;
pub mod fact;
pub mod generator;
pub mod ingest;
pub mod mapper;
pub mod predicate;
pub mod store;
