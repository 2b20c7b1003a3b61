// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Aggregates a dnscache log stream into periodic metrics.
//!
//! Lines are classified into [`event::Event`]s and folded into an
//! [`aggregator::Aggregator`]. A [`sampler::Sampler`] closes windows either on
//! wall-clock ticks (live mode) or on the TAI64N labels embedded in the log
//! (replay mode). Each window becomes a batch of [`metric::Metric`]s pushed
//! through a drop-oldest [`delivery`] channel to a [`sink`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregator;
pub mod constants;
pub mod delivery;
pub mod errors;
pub mod event;
pub mod host;
pub mod metric;
pub mod pipeline;
pub mod sampler;
pub mod sink;
pub mod slowlogs;
pub mod source;
pub mod tai64;
pub mod template;
