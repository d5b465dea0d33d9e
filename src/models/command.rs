//! User command attributes and invocation flags.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};

/// `-nargs` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NArgs {
    Zero,
    One,
    ZeroOrMore,
    ZeroOrOne,
    OneOrMore,
}

impl fmt::Display for NArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            NArgs::Zero => "0",
            NArgs::One => "1",
            NArgs::ZeroOrMore => "*",
            NArgs::ZeroOrOne => "?",
            NArgs::OneOrMore => "+",
        };
        write!(f, "-nargs={n}")
    }
}

/// `-range` kinds without an explicit default count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    /// `-range`: defaults to the current line.
    Line,
    /// `-range=%`: defaults to the whole file.
    File,
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Range::Line => f.write_str("-range"),
            Range::File => f.write_str("-range=%"),
        }
    }
}

/// Boolean attributes; any combination may be given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GenAttr {
    Bang,
    Bar,
    Register,
    Buffer,
}

impl fmt::Display for GenAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenAttr::Bang => f.write_str("-bang"),
            GenAttr::Bar => f.write_str("-bar"),
            GenAttr::Register => f.write_str("-register"),
            GenAttr::Buffer => f.write_str("-buffer"),
        }
    }
}

macro_rules! completions {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Built-in `-complete` kinds.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Complete {
            $($variant),+
        }

        impl Complete {
            pub fn all() -> &'static [Complete] {
                &[$(Complete::$variant),+]
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(Complete::$variant => $name),+
                }
            }
        }
    };
}

completions! {
    Arglist => "arglist",
    Augroup => "augroup",
    Buffer => "buffer",
    Behave => "behave",
    Color => "color",
    Command => "command",
    Compiler => "compiler",
    Cscope => "cscope",
    Dir => "dir",
    Environment => "environment",
    Event => "event",
    Expression => "expression",
    File => "file",
    FileInPath => "file_in_path",
    Filetype => "filetype",
    Function => "function",
    Help => "help",
    Highlight => "highlight",
    History => "history",
    Locale => "locale",
    Mapclear => "mapclear",
    Mapping => "mapping",
    Menu => "menu",
    Messages => "messages",
    Option => "option",
    Packadd => "packadd",
    ShellCmd => "shellcmd",
    Sign => "sign",
    Syntax => "syntax",
    Syntime => "syntime",
    Tag => "tag",
    TagListFiles => "tag_listfiles",
    User => "user",
    Var => "var",
}

impl fmt::Display for Complete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-complete={}", self.name())
    }
}

/// One attribute passed to a command definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommAttr {
    NArgs(NArgs),
    Range(Range),
    /// `-range=N`, rendered as the bare count.
    RangeN(u32),
    /// `-count=N`.
    CountN(u32),
    Complete(Complete),
    /// `-complete=custom,{func}`.
    CompleteCustom(String),
    /// `-complete=customlist,{func}`.
    CompleteCustomList(String),
    General(GenAttr),
}

impl fmt::Display for CommAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommAttr::NArgs(n) => n.fmt(f),
            CommAttr::Range(r) => r.fmt(f),
            CommAttr::RangeN(n) => write!(f, "{n}"),
            CommAttr::CountN(n) => write!(f, "-count={n}"),
            CommAttr::Complete(c) => c.fmt(f),
            CommAttr::CompleteCustom(func) => write!(f, "-complete=custom,{func}"),
            CommAttr::CompleteCustomList(func) => write!(f, "-complete=customlist,{func}"),
            CommAttr::General(g) => g.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RangeFlag {
    Kind(Range),
    N(u32),
}

/// A validated attribute set, ready to send to the editor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandAttrs {
    nargs: Option<NArgs>,
    range: Option<RangeFlag>,
    count: Option<u32>,
    complete: Option<CommAttr>,
    general: BTreeSet<GenAttr>,
}

impl CommandAttrs {
    /// Checks an attribute list for conflicting entries.
    ///
    /// Repeating an identical attribute is allowed.
    pub fn validate(attrs: &[CommAttr]) -> Result<Self, String> {
        let mut out = Self::default();
        for attr in attrs {
            match attr {
                CommAttr::NArgs(n) => {
                    if out.nargs.is_some_and(|prev| prev != *n) {
                        return Err("multiple nargs flags".into());
                    }
                    out.nargs = Some(*n);
                }
                CommAttr::Range(r) => {
                    let flag = RangeFlag::Kind(*r);
                    if out.range.as_ref().is_some_and(|prev| *prev != flag) {
                        return Err("multiple range flags".into());
                    }
                    if out.count.is_some() {
                        return Err("range and count flags are mutually exclusive".into());
                    }
                    out.range = Some(flag);
                }
                CommAttr::RangeN(n) => {
                    let flag = RangeFlag::N(*n);
                    if out.range.as_ref().is_some_and(|prev| *prev != flag) {
                        return Err("multiple range flags".into());
                    }
                    if out.count.is_some() {
                        return Err("range and count flags are mutually exclusive".into());
                    }
                    out.range = Some(flag);
                }
                CommAttr::CountN(n) => {
                    if out.count.is_some_and(|prev| prev != *n) {
                        return Err("multiple count flags".into());
                    }
                    if out.range.is_some() {
                        return Err("range and count flags are mutually exclusive".into());
                    }
                    out.count = Some(*n);
                }
                CommAttr::Complete(_)
                | CommAttr::CompleteCustom(_)
                | CommAttr::CompleteCustomList(_) => {
                    if out.complete.as_ref().is_some_and(|prev| prev != attr) {
                        return Err("multiple complete flags".into());
                    }
                    out.complete = Some(attr.clone());
                }
                CommAttr::General(g) => {
                    out.general.insert(*g);
                }
            }
        }
        Ok(out)
    }

    /// The attribute object sent with a command definition.
    ///
    /// Keys: `nargs`, `range`, `count`, `complete` and `general` (sorted).
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(n) = self.nargs {
            map.insert("nargs".into(), json!(n.to_string()));
        }
        match &self.range {
            Some(RangeFlag::Kind(r)) => {
                map.insert("range".into(), json!(r.to_string()));
            }
            Some(RangeFlag::N(n)) => {
                map.insert("range".into(), json!(CommAttr::RangeN(*n).to_string()));
            }
            None => {}
        }
        if let Some(n) = self.count {
            map.insert("count".into(), json!(CommAttr::CountN(n).to_string()));
        }
        if let Some(c) = &self.complete {
            map.insert("complete".into(), json!(c.to_string()));
        }
        if !self.general.is_empty() {
            let mut general: Vec<String> = self.general.iter().map(|g| g.to_string()).collect();
            general.sort();
            map.insert("general".into(), json!(general));
        }
        Value::Object(map)
    }
}

macro_rules! modifiers {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Command modifiers reported in `<mods>`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum CommMod {
            $($variant),+
        }

        impl CommMod {
            pub fn name(&self) -> &'static str {
                match self {
                    $(CommMod::$variant => $name),+
                }
            }
        }

        impl FromStr for CommMod {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(CommMod::$variant),)+
                    other => Err(format!("unknown CommMod {other:?}")),
                }
            }
        }
    };
}

modifiers! {
    AboveLeft => "aboveleft",
    BelowRight => "belowright",
    BotRight => "botright",
    Browse => "browse",
    Confirm => "confirm",
    Hide => "hide",
    KeepAlt => "keepalt",
    KeepJumps => "keepjumps",
    KeepMarks => "keepmarks",
    KeepPatterns => "keeppatterns",
    LeftAbove => "leftabove",
    LockMarks => "lockmarks",
    NoSwapfile => "noswapfile",
    RightBelow => "rightbelow",
    Silent => "silent",
    Tab => "tab",
    TopLeft => "topleft",
    Verbose => "verbose",
    Vertical => "vertical",
}

impl fmt::Display for CommMod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the editor reports about one command invocation.
///
/// Fields are only present when the command was defined with the matching
/// attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommandFlags {
    #[serde(default)]
    pub line1: Option<i64>,
    #[serde(default)]
    pub line2: Option<i64>,
    #[serde(default)]
    pub range: Option<i64>,
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_bang")]
    pub bang: Option<bool>,
    #[serde(default, rename = "reg")]
    pub register: Option<String>,
    #[serde(default, deserialize_with = "deserialize_mods")]
    pub mods: Vec<CommMod>,
}

fn deserialize_bang<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    let bang: Option<String> = Option::deserialize(d)?;
    Ok(bang.map(|b| b == "!"))
}

fn deserialize_mods<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<CommMod>, D::Error> {
    let mods: Option<String> = Option::deserialize(d)?;
    mods.unwrap_or_default()
        .split_whitespace()
        .map(|m| m.parse().map_err(serde::de::Error::custom))
        .collect()
}
