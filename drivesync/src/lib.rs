#![allow(async_fn_in_trait)]

use std::{cmp, time};

use chrono::{DateTime, Utc};
use futures::future::{self, Future};

pub mod drive;
pub mod fs;
pub mod loc;
pub mod oauth;
pub mod sync;

mod error;

pub use crate::error::{Error, Result};

/// Tolerance used when comparing modification times.
///
/// Google Drive stores timestamps with millisecond precision and local
/// filesystems vary, so timestamps within this duration are considered equal.
pub const MTIME_TOL: time::Duration = time::Duration::from_secs(1);

pub fn compare_mtime(lhs: DateTime<Utc>, rhs: DateTime<Utc>) -> cmp::Ordering {
    if lhs + MTIME_TOL < rhs {
        cmp::Ordering::Less
    } else if lhs - MTIME_TOL > rhs {
        cmp::Ordering::Greater
    } else {
        cmp::Ordering::Equal
    }
}

/// Implemented by components that cache state in memory and
/// save it to disk at the end of the program.
pub trait PersistCache {
    fn persist_cache(&self) -> impl Future<Output = Result<()>> + Send {
        future::ready(Ok(()))
    }
}
