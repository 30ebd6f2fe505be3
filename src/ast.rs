// Syntax tree for pipe expressions inside template tags
//
//   {{ user.name trim padstart 10 $fill }}
//      ^^^^^^^^^ ^^^^ ^^^^^^^^^^^^^^^^^^
//      head      stage stage with args

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// One segment of an object path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Segment {
    /// `.`: no-op self reference
    SelfRef,
    /// `_` in first position: the enclosing loop's item instead of the innermost
    Outer,
    /// `#`: the innermost loop's current key
    Index,
    /// Ordinary key lookup
    Key(String),
}

/// Dot-separated lookup path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPath {
    pub segments: Vec<Segment>,
}

impl ObjectPath {
    pub fn parse(text: &str) -> Self {
        if text.is_empty() || text == "." {
            return ObjectPath {
                segments: vec![Segment::SelfRef],
            };
        }
        let segments = text
            .split('.')
            .enumerate()
            .map(|(i, part)| match part {
                "" => Segment::SelfRef,
                "#" => Segment::Index,
                "_" if i == 0 => Segment::Outer,
                key => Segment::Key(key.to_string()),
            })
            .collect();
        ObjectPath { segments }
    }

    /// The `#` path.
    pub fn index() -> Self {
        ObjectPath {
            segments: vec![Segment::Index],
        }
    }

    /// `#` short-circuits the whole path, wherever it appears.
    pub fn refers_to_index(&self) -> bool {
        self.segments.contains(&Segment::Index)
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                Segment::SelfRef => {}
                Segment::Outer => f.write_str("_")?,
                Segment::Index => f.write_str("#")?,
                Segment::Key(key) => f.write_str(key)?,
            }
        }
        Ok(())
    }
}

/// Literal token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::String(s) => Value::from(s.as_str()),
            Literal::Number(n) => Value::Number(*n),
            Literal::Boolean(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
        }
    }
}

/// Starting value of a pipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Head {
    Path(ObjectPath),
    Literal(Literal),
}

/// Stage argument: a literal or a `$`-prefixed path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Argument {
    Path(ObjectPath),
    Literal(Literal),
}

/// A named transformation applied to the upstream value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub args: Vec<Argument>,
}

/// A head followed by zero or more stages, evaluated left to right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeExpr {
    pub head: Head,
    pub stages: Vec<Stage>,
}

impl PipeExpr {
    /// `{{}}` emits the current iteration key.
    pub fn index() -> Self {
        PipeExpr {
            head: Head::Path(ObjectPath::index()),
            stages: Vec::new(),
        }
    }
}
