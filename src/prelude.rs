#![allow(unused_imports)]

pub use log::{debug, error, info, log, trace, warn};

pub use crate::error::{Error, Result, TrapBug};
pub use crate::channel::{ChanKind, ChanNum};
pub use crate::traffic::Transport;
