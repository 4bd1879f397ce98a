pub mod batch;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod lanes;
pub mod lims;
pub mod orchestrator;
pub mod reconcile;
pub mod report;
pub mod seqcenter;
pub mod ticket;
pub mod validate;
