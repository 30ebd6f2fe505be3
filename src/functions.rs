// Built-in pipe functions
// Each pipe is a method of `Pipes`, a host object, so stage lookup goes
// through the same dynamic object protocol as any other value. Pipes receive
// the upstream value as their first argument.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use crate::datetime::DateObject;
use crate::object::ObjectBag;
use crate::reflect::{MemberCache, MemberTable, Reflect};
use crate::signature::ParamType::{Any, Number, Rest, String as Str};
use crate::utils::to_array;
use crate::value::{Value, ValueError};

/// The built-in pipe table for one evaluation.
pub struct Pipes {
    globals: Arc<ObjectBag>,
}

impl Pipes {
    pub fn new(globals: Arc<ObjectBag>) -> Self {
        Pipes { globals }
    }

    /// `as name`: bind the value to a global, emit nothing.
    fn bind(&self, value: &Value, name: &Value) -> Value {
        if let Some(name) = name.as_str().filter(|n| !n.is_empty()) {
            self.globals.insert(name, value.clone());
        }
        Value::from("")
    }
}

impl Reflect for Pipes {
    fn describe(members: &mut MemberTable<Self>) {
        members
            .method("as", &[Any, Str], |p, a| Ok(p.bind(&a[0], &a[1])))
            .method("type", &[Any], |_, a| Ok(Value::from(a[0].type_of())))
            // Logic
            .method("bool", &[Any], |_, a| Ok(Value::Bool(a[0].to_boolean())))
            .method("true!", &[Any], |_, a| Ok(Value::Bool(matches!(a[0], Value::Bool(true)))))
            .method("false!", &[Any], |_, a| Ok(Value::Bool(matches!(a[0], Value::Bool(false)))))
            .method("not", &[Any], |_, a| Ok(Value::Bool(!a[0].to_boolean())))
            .method("or", &[Any, Any], |_, a| Ok(logic::or(&a[0], &a[1])))
            .method("choose", &[Any, Any, Any], |_, a| Ok(logic::choose(&a[0], &a[1], &a[2])))
            // Length and comparisons
            .method("length", &[Any], |_, a| Ok(Value::from(compare::length_of(&a[0]))))
            .method("empty", &[Any], |_, a| Ok(Value::Bool(compare::length_of(&a[0]) == 0)))
            .method("notempty", &[Any], |_, a| Ok(Value::Bool(compare::length_of(&a[0]) != 0)))
            .method("more", &[Any, Number], |_, a| Ok(compare::measured(&a[0], &a[1], |m, n| m > n)))
            .method("less", &[Any, Number], |_, a| Ok(compare::measured(&a[0], &a[1], |m, n| m < n)))
            .method("ormore", &[Any, Number], |_, a| Ok(compare::measured(&a[0], &a[1], |m, n| m >= n)))
            .method("orless", &[Any, Number], |_, a| Ok(compare::measured(&a[0], &a[1], |m, n| m <= n)))
            .method("between", &[Any, Number, Number], |_, a| Ok(compare::between(&a[0], &a[1], &a[2])))
            .method("equals", &[Any, Any], |_, a| Ok(Value::Bool(a[0].loose_eq(&a[1]))))
            .method("notequals", &[Any, Any], |_, a| Ok(Value::Bool(!a[0].loose_eq(&a[1]))))
            .method("even", &[Any], |_, a| Ok(Value::Bool(numeric::is_even(&a[0]))))
            .method("odd", &[Any], |_, a| Ok(Value::Bool(numeric::is_odd(&a[0]))))
            // Strings
            .method("concat", &[Rest], |_, a| Ok(string::concat(&a[0])))
            .method("trim", &[Any, Str], |_, a| string::trim(&a[0], &a[1], Position::Both))
            .method("trimstart", &[Any, Str], |_, a| string::trim(&a[0], &a[1], Position::Start))
            .method("trimend", &[Any, Str], |_, a| string::trim(&a[0], &a[1], Position::End))
            .method("padstart", &[Any, Number, Str], |_, a| string::pad(&a[0], &a[1], &a[2], Position::Start))
            .method("padend", &[Any, Number, Str], |_, a| string::pad(&a[0], &a[1], &a[2], Position::End))
            .method("split", &[Any], |_, a| Ok(string::split_whitespace(&a[0])))
            .method("split", &[Any, Str], |_, a| Ok(string::split(&a[0], &a[1])))
            // Arrays
            .method("join", &[Any], |_, a| Ok(array::join(&a[0], ",")))
            .method("join", &[Any, Str], |_, a| Ok(array::join(&a[0], a[1].as_str().unwrap_or_default())))
            .method("sort", &[Any], |_, a| Ok(array::sort(&a[0], None)))
            .method("sort", &[Any, Str], |_, a| Ok(array::sort(&a[0], a[1].as_str())))
            .method("reverse", &[Any], |_, a| Ok(array::reverse(&a[0])))
            // Dates
            .method("date", &[Any], |_, a| Ok(to_date(&a[0])))
            // Arithmetic
            .method("plus", &[Any, Any], |_, a| Ok(a[0].add(&a[1])))
            .method("minus", &[Any, Any], |_, a| Ok(a[0].subtract(&a[1])))
            .method("multiply", &[Any, Any], |_, a| Ok(a[0].multiply(&a[1])))
            .method("divide", &[Any, Any], |_, a| Ok(a[0].divide(&a[1])))
            .method("mod", &[Any, Any], |_, a| Ok(a[0].remainder(&a[1])));
    }

    fn type_name(&self) -> &str {
        "Pipes"
    }
}

/// How many bare words after the built-in stage `name` are read as its
/// string arguments: the widest fixed overload's parameters after the piped
/// value. `None` when `name` is not a built-in pipe.
pub fn literal_slots(name: &str) -> Option<usize> {
    let members = MemberCache::global().members_of::<Pipes>();
    let overloads = members.methods(name)?;
    Some(
        overloads
            .iter()
            .map(|method| method.signature())
            .filter(|signature| !signature.is_variadic())
            .map(|signature| signature.arity().saturating_sub(1))
            .max()
            .unwrap_or(0),
    )
}

/// Which end(s) of a string a trim or pad applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Start,
    End,
    Both,
}

/// Built-in logic pipes
pub mod logic {
    use super::*;

    /// `or alt`: the value when truthy, `alt` otherwise
    pub fn or(value: &Value, alt: &Value) -> Value {
        if value.to_boolean() {
            value.clone()
        } else {
            alt.clone()
        }
    }

    /// `choose a b`: ternary on the value's truthiness
    pub fn choose(value: &Value, when_true: &Value, when_false: &Value) -> Value {
        if value.to_boolean() {
            when_true.clone()
        } else {
            when_false.clone()
        }
    }
}

/// Built-in length and comparison pipes
pub mod compare {
    use super::*;

    /// Characters of a string, entries of an object, 0 for undefined/null.
    pub fn length_of(value: &Value) -> usize {
        match value {
            Value::Undefined | Value::Null => 0,
            Value::String(s) => s.chars().count(),
            Value::Object(obj) => obj.len(),
            other => other.to_string().chars().count(),
        }
    }

    /// Numbers and booleans measure as themselves, everything else by length.
    pub fn measure(value: &Value) -> f64 {
        match value {
            Value::Number(_) | Value::Bool(_) => value.to_number(),
            other => length_of(other) as f64,
        }
    }

    pub fn measured(value: &Value, bound: &Value, test: impl Fn(f64, f64) -> bool) -> Value {
        Value::Bool(test(measure(value), bound.to_number()))
    }

    /// Inclusive on both ends.
    pub fn between(value: &Value, low: &Value, high: &Value) -> Value {
        let m = measure(value);
        Value::Bool(m >= low.to_number() && m <= high.to_number())
    }
}

/// Built-in numeric predicates
pub mod numeric {
    use super::*;

    pub fn is_even(value: &Value) -> bool {
        let n = value.to_number();
        n.is_finite() && n % 2.0 == 0.0
    }

    pub fn is_odd(value: &Value) -> bool {
        let n = value.to_number();
        n.is_finite() && n.abs() % 2.0 == 1.0
    }
}

/// Built-in string pipes
pub mod string {
    use super::*;

    /// Concatenate the string forms of every evaluable argument.
    pub fn concat(parts: &Value) -> Value {
        let mut out = String::new();
        for part in parts.items().iter().filter(|p| p.is_evaluable()) {
            out.push_str(&part.to_string());
        }
        Value::from(out)
    }

    /// Strip characters matching a regex character class (default `\s`).
    pub fn trim(value: &Value, chars: &Value, position: Position) -> Result<Value, ValueError> {
        if !value.is_evaluable() {
            return Ok(value.clone());
        }
        edges(&value.to_string(), chars, position, Edge::Strip)
    }

    /// Pad to `width` characters by cycling the character set (default a
    /// single space). Non-finite widths leave the text as it is.
    pub fn pad(value: &Value, width: &Value, fill: &Value, position: Position) -> Result<Value, ValueError> {
        let text = if value.is_evaluable() {
            value.to_string()
        } else {
            String::new()
        };
        let width = width.to_number();
        let len = text.chars().count();
        if !width.is_finite() || width <= len as f64 {
            return Ok(Value::from(text));
        }
        let needed = width - len as f64;
        if needed > MAX_PAD as f64 {
            return Err(ValueError::Runtime(format!(
                "pad width {} exceeds the limit of {} added characters",
                width, MAX_PAD
            )));
        }
        edges(&text, fill, position, Edge::Pad(needed as usize))
    }

    /// Longest run of characters a single pad may add.
    pub const MAX_PAD: usize = 1 << 20;

    enum Edge {
        Strip,
        Pad(usize),
    }

    /// Shared primitive behind trim and pad: a character set applied at the
    /// ends picked by `position`.
    fn edges(text: &str, chars: &Value, position: Position, edge: Edge) -> Result<Value, ValueError> {
        let chars = chars.as_str().filter(|c| !c.is_empty());
        match edge {
            Edge::Strip => {
                let class = chars.unwrap_or(r"\s");
                let re = char_class(class, position)?;
                Ok(Value::from(re.replace_all(text, "").into_owned()))
            }
            Edge::Pad(needed) => {
                let fill: Vec<char> = match chars {
                    Some(set) => unescape(set).chars().collect(),
                    None => vec![' '],
                };
                let (before, after) = match position {
                    Position::Start => (needed, 0),
                    Position::End => (0, needed),
                    Position::Both => (needed / 2, needed - needed / 2),
                };
                let mut out = String::with_capacity(text.len() + needed);
                out.extend(fill.iter().cycle().take(before));
                out.push_str(text);
                out.extend(fill.iter().cycle().take(after));
                Ok(Value::from(out))
            }
        }
    }

    /// `\x` inside a character set stands for `x` when used as fill.
    fn unescape(set: &str) -> String {
        let mut out = String::with_capacity(set.len());
        let mut chars = set.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => out.extend(chars.next()),
                other => out.push(other),
            }
        }
        out
    }

    static CHAR_CLASSES: Lazy<RwLock<HashMap<String, Regex>>> =
        Lazy::new(|| RwLock::new(HashMap::new()));

    /// Compiled trim patterns keyed by their source; never evicted.
    fn char_class(class: &str, position: Position) -> Result<Regex, ValueError> {
        let pattern = match position {
            Position::Start => format!("^[{}]+", class),
            Position::End => format!("[{}]+$", class),
            Position::Both => format!("^[{0}]+|[{0}]+$", class),
        };
        if let Some(re) = CHAR_CLASSES.read().get(&pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(&pattern).map_err(|e| {
            ValueError::Runtime(format!("invalid character set '{}': {}", class, e))
        })?;
        CHAR_CLASSES.write().insert(pattern, re.clone());
        Ok(re)
    }

    pub fn split_whitespace(value: &Value) -> Value {
        let text = value.to_string();
        Value::array(text.split_whitespace().map(Value::from).collect())
    }

    pub fn split(value: &Value, separator: &Value) -> Value {
        match separator.as_str() {
            Some("") | None => split_whitespace(value),
            Some(sep) => {
                let text = value.to_string();
                Value::array(text.split(sep).map(Value::from).collect())
            }
        }
    }
}

/// Built-in array pipes
pub mod array {
    use super::*;

    pub fn join(value: &Value, separator: &str) -> Value {
        let parts: Vec<String> = to_array(value).iter().map(Value::to_string).collect();
        Value::from(parts.join(separator))
    }

    /// Stable sort; numeric when every sort key is a number, by string otherwise.
    pub fn sort(value: &Value, key: Option<&str>) -> Value {
        let mut keyed: Vec<(Value, Value)> = to_array(value)
            .into_iter()
            .map(|item| {
                let sort_key = match key {
                    Some(k) if !k.is_empty() => item.get(k).unwrap_or(Value::Undefined),
                    _ => item.clone(),
                };
                (sort_key, item)
            })
            .collect();

        if keyed.iter().all(|(k, _)| matches!(k, Value::Number(_))) {
            keyed.sort_by(|a, b| a.0.to_number().total_cmp(&b.0.to_number()));
        } else {
            keyed.sort_by(|a, b| a.0.to_string().cmp(&b.0.to_string()));
        }
        Value::array(keyed.into_iter().map(|(_, item)| item).collect())
    }

    /// Reverse an array's elements or a string's characters.
    pub fn reverse(value: &Value) -> Value {
        match value {
            Value::String(s) => Value::from(s.chars().rev().collect::<String>()),
            Value::Object(_) => {
                let mut items = to_array(value);
                items.reverse();
                Value::array(items)
            }
            other => other.clone(),
        }
    }
}

/// `date`: epoch milliseconds or date text to a `Date` object; `Undefined`
/// when the input cannot be read as a date.
fn to_date(value: &Value) -> Value {
    if value.downcast_host::<DateObject>().is_some() {
        return value.clone();
    }
    let parsed = match value {
        Value::Number(ms) if ms.is_finite() => DateObject::from_millis(*ms as i64),
        Value::String(text) => DateObject::parse(text),
        _ => return Value::Undefined,
    };
    match parsed {
        Ok(date) => Value::from_host(date),
        Err(e) => {
            debug!("date pipe: {}", e);
            Value::Undefined
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pipes() -> (Value, Arc<ObjectBag>) {
        let globals = Arc::new(ObjectBag::new());
        (Value::from_host(Pipes::new(Arc::clone(&globals))), globals)
    }

    fn call(name: &str, args: &[Value]) -> Value {
        let (table, _) = pipes();
        table.get(name).unwrap().invoke(&table, args).unwrap()
    }

    fn s(text: &str) -> Value {
        Value::from(text)
    }

    #[test]
    fn test_as_binds_global() {
        let (table, globals) = pipes();
        let out = table
            .get("as")
            .unwrap()
            .invoke(&table, &[Value::from(5), s("total")])
            .unwrap();
        assert_eq!(out, s(""));
        assert_eq!(globals.get("total"), Some(Value::from(5)));

        let (table, globals) = pipes();
        let bind = table.get("as").unwrap();
        bind.invoke(&table, &[Value::from(1)]).unwrap();
        bind.invoke(&table, &[Value::from(1), s("")]).unwrap();
        assert!(globals.is_empty());
    }

    #[test]
    fn test_type_and_logic() {
        assert_eq!(call("type", &[Value::Null]), s("object"));
        assert_eq!(call("type", &[Value::Undefined]), s("undefined"));
        assert_eq!(call("type", &[Value::from(json!([1]))]), s("object"));
        assert_eq!(call("bool", &[s("x")]), Value::Bool(true));
        assert_eq!(call("true!", &[Value::from(1)]), Value::Bool(false));
        assert_eq!(call("true!", &[Value::Bool(true)]), Value::Bool(true));
        assert_eq!(call("false!", &[Value::Bool(false)]), Value::Bool(true));
        assert_eq!(call("not", &[Value::from(0)]), Value::Bool(true));
        assert_eq!(call("or", &[s(""), s("alt")]), s("alt"));
        assert_eq!(call("choose", &[Value::from(1), s("a"), s("b")]), s("a"));
        assert_eq!(call("choose", &[Value::Null, s("a"), s("b")]), s("b"));
    }

    #[test]
    fn test_lengths_and_comparisons() {
        let items = Value::from(json!([1, 2, 3]));
        assert_eq!(call("length", &[items.clone()]), Value::from(3));
        assert_eq!(call("length", &[s("héllo")]), Value::from(5));
        assert_eq!(call("empty", &[Value::from(json!([]))]), Value::Bool(true));
        assert_eq!(call("empty", &[Value::Undefined]), Value::Bool(true));
        assert_eq!(call("notempty", &[items.clone()]), Value::Bool(true));
        assert_eq!(call("more", &[items.clone(), Value::from(2)]), Value::Bool(true));
        assert_eq!(call("less", &[Value::from(5), s("10")]), Value::Bool(true));
        assert_eq!(call("ormore", &[s("abc"), Value::from(3)]), Value::Bool(true));
        assert_eq!(call("orless", &[s("abcd"), Value::from(3)]), Value::Bool(false));
        assert_eq!(call("between", &[Value::from(3), Value::from(3), Value::from(5)]), Value::Bool(true));
        assert_eq!(call("between", &[Value::from(6), Value::from(3), Value::from(5)]), Value::Bool(false));
        assert_eq!(call("equals", &[Value::from(1), s("1")]), Value::Bool(true));
        assert_eq!(call("notequals", &[s("a"), s("b")]), Value::Bool(true));
        assert_eq!(call("even", &[Value::from(4)]), Value::Bool(true));
        assert_eq!(call("odd", &[Value::from(-3)]), Value::Bool(true));
        assert_eq!(call("odd", &[Value::from(2.5)]), Value::Bool(false));
        assert_eq!(call("even", &[Value::from(f64::INFINITY)]), Value::Bool(false));
    }

    #[test]
    fn test_string_pipes() {
        assert_eq!(call("concat", &[s("a"), Value::from(1), Value::Null, s("b")]), s("a1b"));
        assert_eq!(call("trim", &[s("  x  ")]), s("x"));
        assert_eq!(call("trimstart", &[s("--x--"), s("-")]), s("x--"));
        assert_eq!(call("trimend", &[s("--x--"), s(r"\-")]), s("--x"));
        assert_eq!(call("trim", &[s("xyhixy"), s("xy")]), s("hi"));
        assert_eq!(call("padstart", &[Value::from(7), Value::from(3), s("0")]), s("007"));
        assert_eq!(call("padend", &[s("ab"), Value::from(5), s("xy")]), s("abxyx"));
        assert_eq!(call("padstart", &[s("long"), Value::from(2)]), s("long"));
        assert_eq!(call("padend", &[s("a"), Value::from(3)]), s("a  "));
        assert_eq!(call("split", &[s(" a  b ")]).items(), vec![s("a"), s("b")]);
        assert_eq!(call("split", &[s("a,b,"), s(",")]).items(), vec![s("a"), s("b"), s("")]);
    }

    #[test]
    fn test_pad_width_limits() {
        let (table, _) = pipes();
        let pad = table.get("padstart").unwrap();
        let err = pad.invoke(&table, &[s("a"), Value::from(1e20)]).unwrap_err();
        assert!(matches!(err, ValueError::Invocation { .. }));
        assert!(pad.invoke(&table, &[s("a"), Value::from(1e12)]).is_err());

        assert_eq!(call("padend", &[s("a"), Value::from(f64::INFINITY)]), s("a"));
        assert_eq!(call("padstart", &[s("a"), Value::from(f64::NAN)]), s("a"));
        assert_eq!(call("padstart", &[s("a"), Value::from(-5)]), s("a"));
        let wide = call("padend", &[s(""), Value::from(string::MAX_PAD as f64)]);
        assert_eq!(compare::length_of(&wide), string::MAX_PAD);
    }

    #[test]
    fn test_trim_and_pad_share_character_sets() {
        assert_eq!(call("padstart", &[s("x"), Value::from(3), s(r"\-")]), s("--x"));
        assert_eq!(call("trimstart", &[s("--x"), s(r"\-")]), s("x"));
        // Repeated calls reuse the compiled class
        for _ in 0..3 {
            assert_eq!(call("trimend", &[s("x..."), s(".")]), s("x"));
        }
    }

    #[test]
    fn test_literal_slots() {
        assert_eq!(literal_slots("as"), Some(1));
        assert_eq!(literal_slots("choose"), Some(2));
        assert_eq!(literal_slots("padstart"), Some(2));
        assert_eq!(literal_slots("join"), Some(1));
        assert_eq!(literal_slots("length"), Some(0));
        assert_eq!(literal_slots("concat"), Some(0));
        assert_eq!(literal_slots("greet"), None);
    }

    #[test]
    fn test_invalid_trim_class() {
        let (table, _) = pipes();
        let err = table
            .get("trim")
            .unwrap()
            .invoke(&table, &[s("x"), s("z-a")])
            .unwrap_err();
        assert!(matches!(err, ValueError::Invocation { .. }));
    }

    #[test]
    fn test_array_pipes() {
        let items = Value::from(json!([3, 1, 2]));
        assert_eq!(call("join", &[items.clone()]), s("3,1,2"));
        assert_eq!(call("join", &[items.clone(), s(" - ")]), s("3 - 1 - 2"));
        assert_eq!(call("sort", &[items.clone()]).items(), vec![Value::from(1), Value::from(2), Value::from(3)]);
        // Numbers sort numerically, mixed values as strings
        let nums = Value::from(json!([10, 9, 100]));
        assert_eq!(call("join", &[call("sort", &[nums])]), s("9,10,100"));
        let mixed = Value::from(json!(["10", 9, "100"]));
        assert_eq!(call("join", &[call("sort", &[mixed])]), s("10,100,9"));

        let people = Value::from(json!([{"n": "b", "age": 2}, {"n": "a", "age": 1}]));
        let sorted = call("sort", &[people, s("n")]);
        assert_eq!(sorted.get("0").unwrap().get("age").unwrap(), Value::from(1));

        assert_eq!(call("join", &[call("reverse", &[items])]), s("2,1,3"));
        assert_eq!(call("reverse", &[s("abc")]), s("cba"));
        assert_eq!(call("reverse", &[Value::from(5)]), Value::from(5));
    }

    #[test]
    fn test_date_pipe() {
        let d = call("date", &[Value::from(0)]);
        assert_eq!(d.to_string(), "[object Date]");
        assert_eq!(d.get("year").unwrap(), Value::from(1970));
        assert!(call("date", &[d.clone()]).same_object(&d));
        assert_eq!(call("date", &[s("2024-03-01")]).get("month").unwrap(), Value::from(3));
        assert!(call("date", &[s("soon")]).is_undefined());
        assert!(call("date", &[Value::Bool(true)]).is_undefined());
    }

    #[test]
    fn test_arithmetic_pipes() {
        assert_eq!(call("plus", &[Value::from(2), Value::from(3)]), Value::from(5));
        assert_eq!(call("plus", &[s("a"), Value::from(1)]), s("a1"));
        assert_eq!(call("minus", &[s("5"), Value::from(3)]), Value::from(2));
        assert_eq!(call("multiply", &[Value::from(2), s("4")]), Value::from(8));
        assert_eq!(call("divide", &[Value::from(1), Value::from(4)]), Value::from(0.25));
        assert_eq!(call("mod", &[Value::from(7), Value::from(3)]), Value::from(1));
    }

    #[test]
    fn test_pipes_object() {
        let (table, _) = pipes();
        assert_eq!(table.to_string(), "[object Pipes]");
        assert!(table.keys().any(|k| k == "padstart"));
        assert!(table.get("nosuch").unwrap().is_undefined());
    }
}
