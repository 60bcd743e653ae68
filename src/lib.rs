// SPDX-License-Identifier: Apache-2.0

pub mod arbiter;
pub mod campaign;
pub mod config;
pub mod coverage;
pub mod exec;
pub mod filter;
pub mod mutate;
pub mod oracle;
pub mod persist;
pub mod rv32;
pub mod testcase;
pub mod wcache;
