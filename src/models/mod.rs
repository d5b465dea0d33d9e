//! Editor-facing value types.

pub mod autocmd;
pub mod command;
pub mod editor;

pub use autocmd::{Event, Pattern};
pub use command::{
    CommAttr, CommMod, CommandAttrs, CommandFlags, Complete, GenAttr, NArgs, Range,
};
pub use editor::{parse_version_long, Flavor};
