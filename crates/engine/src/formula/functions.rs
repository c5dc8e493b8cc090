// Built-in formula functions
//
// Numeric results follow the profile formula conventions: integer inputs stay
// integers where the operation allows it, `round(x)` and `math.ceil` return
// integers, everything trigonometric returns floats.

use std::cmp::Ordering;

use crate::value::Value;

/// Context functions need the evaluator's lookup and are dispatched there.
pub const CONTEXT_FUNCTIONS: [&str; 3] = ["extruderValue", "extruderValues", "resolveOrValue"];

/// Check if a function name is a known built-in function.
/// This is the single source of truth for supported functions.
pub fn is_known_function(name: &str) -> bool {
    is_context_function(name)
        || matches!(
            name,
            // Aggregates
            "min" | "max" | "sum" | "len" | "any" | "all" |
            // Numeric
            "abs" | "round" |
            // Conversions
            "int" | "float" | "str" | "bool" |
            // math module
            "math.ceil" | "math.floor" | "math.sqrt" | "math.tan" | "math.radians"
        )
}

pub fn is_context_function(name: &str) -> bool {
    CONTEXT_FUNCTIONS.contains(&name)
}

/// Call a pure built-in with already evaluated arguments.
pub fn call_builtin(name: &str, args: Vec<Value>) -> Result<Value, String> {
    match name {
        "min" => extreme(name, args, Ordering::Less),
        "max" => extreme(name, args, Ordering::Greater),
        "sum" => sum(one_list(name, args)?),
        "len" => match one_arg(name, args)? {
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            Value::Text(s) => Ok(Value::Int(s.chars().count() as i64)),
            other => Err(format!("object of type '{}' has no len()", other.type_name())),
        },
        "any" => Ok(Value::Bool(one_list(name, args)?.iter().any(Value::truthy))),
        "all" => Ok(Value::Bool(one_list(name, args)?.iter().all(Value::truthy))),
        "abs" => match one_arg(name, args)? {
            Value::Int(i) => Ok(Value::Int(i.abs())),
            other => Ok(Value::Float(other.to_number()?.abs())),
        },
        "round" => round(args),
        "int" => to_int(one_arg(name, args)?),
        "float" => Ok(Value::Float(one_arg(name, args)?.to_number()?)),
        "str" => Ok(Value::Text(one_arg(name, args)?.to_text())),
        "bool" => Ok(Value::Bool(one_arg(name, args)?.truthy())),
        "math.ceil" => integral(one_arg(name, args)?.to_number()?.ceil()),
        "math.floor" => integral(one_arg(name, args)?.to_number()?.floor()),
        "math.sqrt" => {
            let x = one_arg(name, args)?.to_number()?;
            if x < 0.0 {
                return Err("math domain error".to_string());
            }
            Ok(Value::Float(x.sqrt()))
        }
        "math.tan" => Ok(Value::Float(one_arg(name, args)?.to_number()?.tan())),
        "math.radians" => Ok(Value::Float(one_arg(name, args)?.to_number()?.to_radians())),
        _ => Err(format!("unknown function '{}'", name)),
    }
}

/// Order two values: numbers numerically, text lexically, lists element-wise.
pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering, String> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Text(x), Value::Text(y)) => Ok(x.cmp(y)),
        (Value::List(xs), Value::List(ys)) => {
            for (x, y) in xs.iter().zip(ys.iter()) {
                let ord = compare_values(x, y)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(xs.len().cmp(&ys.len()))
        }
        (Value::Int(_) | Value::Float(_) | Value::Bool(_), Value::Int(_) | Value::Float(_) | Value::Bool(_)) => {
            let (x, y) = (a.to_number()?, b.to_number()?);
            x.partial_cmp(&y).ok_or_else(|| "cannot compare NaN".to_string())
        }
        _ => Err(format!(
            "'<' not supported between '{}' and '{}'",
            a.type_name(),
            b.type_name()
        )),
    }
}

fn one_arg(name: &str, mut args: Vec<Value>) -> Result<Value, String> {
    if args.len() != 1 {
        return Err(format!("{}() takes exactly one argument ({} given)", name, args.len()));
    }
    Ok(args.remove(0))
}

fn one_list(name: &str, args: Vec<Value>) -> Result<Vec<Value>, String> {
    match one_arg(name, args)? {
        Value::List(items) => Ok(items),
        other => Err(format!("{}() expects a list, got '{}'", name, other.type_name())),
    }
}

/// min/max over either a single list argument or all arguments.
fn extreme(name: &str, args: Vec<Value>, wanted: Ordering) -> Result<Value, String> {
    let single_list = matches!(args.as_slice(), [Value::List(_)]);
    let items = if single_list { one_list(name, args)? } else { args };
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| format!("{}() arg is an empty sequence", name))?;
    for item in iter {
        if compare_values(&item, &best)? == wanted {
            best = item;
        }
    }
    Ok(best)
}

fn sum(items: Vec<Value>) -> Result<Value, String> {
    let mut int_total: i64 = 0;
    let mut float_total: Option<f64> = None;
    for item in &items {
        if let Some(total) = float_total.as_mut() {
            *total += item.to_number()?;
            continue;
        }
        match item {
            Value::Int(i) => int_total = int_total.wrapping_add(*i),
            Value::Bool(b) => int_total += *b as i64,
            other => float_total = Some(int_total as f64 + other.to_number()?),
        }
    }
    Ok(match float_total {
        Some(total) => Value::Float(total),
        None => Value::Int(int_total),
    })
}

fn round(mut args: Vec<Value>) -> Result<Value, String> {
    match args.len() {
        1 => match args.remove(0) {
            Value::Int(i) => Ok(Value::Int(i)),
            other => integral(other.to_number()?.round_ties_even()),
        },
        2 => {
            let digits = args.remove(1).to_number()? as i32;
            let value = args.remove(0);
            if let Value::Int(i) = value {
                if digits >= 0 {
                    return Ok(Value::Int(i));
                }
            }
            let scale = 10f64.powi(digits);
            Ok(Value::Float((value.to_number()? * scale).round_ties_even() / scale))
        }
        n => Err(format!("round() takes 1 or 2 arguments ({} given)", n)),
    }
}

fn to_int(value: Value) -> Result<Value, String> {
    match value {
        Value::Int(_) => Ok(value),
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        Value::Float(f) => integral(f.trunc()),
        Value::Text(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format!("invalid literal for int(): '{}'", s)),
        other => Err(format!("int() argument must be a number, not '{}'", other.type_name())),
    }
}

fn integral(f: f64) -> Result<Value, String> {
    if f.is_finite() {
        Ok(Value::Int(f as i64))
    } else {
        Err(format!("cannot convert {} to integer", f))
    }
}
