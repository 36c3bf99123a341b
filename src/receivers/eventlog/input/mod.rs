// SPDX-License-Identifier: Apache-2.0

mod file_id;
mod log_set;
mod reader;
mod tail;

pub use file_id::FileId;
pub use log_set::{LogFile, LogSet};
pub use reader::FileReader;
pub use tail::{LiveTail, SwitchReason, TailEvent, open_live};
