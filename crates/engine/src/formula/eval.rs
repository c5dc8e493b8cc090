// Formula evaluator - evaluates parsed expressions against a setting lookup

use crate::document::Context;
use crate::error::ResolveError;
use crate::value::Value;

use super::functions::{call_builtin, compare_values, is_known_function};
use super::parser::{Expr, Op, UnaryOp};

/// Access to other settings while a formula is evaluated.
///
/// Implementations resolve references through the full stack and may recurse
/// into further formulas, hence `&mut self`.
pub trait SettingLookup {
    /// Value of `key` in the context being evaluated.
    fn value_of(&mut self, key: &str) -> Result<Value, EvalError>;

    /// Value of `key` in an explicit context.
    fn value_in(&mut self, key: &str, context: Context) -> Result<Value, EvalError>;

    /// Extruder positions of the stack, ascending. Empty for single-context stacks.
    fn extruder_positions(&self) -> Vec<u32>;

    fn current_context(&self) -> Context;
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Reference to a key outside the universe.
    Unknown(String),
    /// Runtime failure: bad operand types, division by zero, bad arguments.
    Failed(String),
    /// Failure that must abort the whole pass (dependency cycle, load error).
    Structural(ResolveError),
}

impl From<String> for EvalError {
    fn from(message: String) -> Self {
        EvalError::Failed(message)
    }
}

impl From<ResolveError> for EvalError {
    fn from(err: ResolveError) -> Self {
        EvalError::Structural(err)
    }
}

pub fn evaluate<L: SettingLookup + ?Sized>(expr: &Expr, lookup: &mut L) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::List(items) => items
            .iter()
            .map(|item| evaluate(item, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Key(key) => lookup.value_of(key),
        Expr::Call { name, args } => call(name, args, lookup),
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, lookup)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                UnaryOp::Neg => match value {
                    Value::Int(i) => i
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| EvalError::Failed("integer overflow".to_string())),
                    Value::Bool(b) => Ok(Value::Int(-(b as i64))),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(EvalError::Failed(format!(
                        "bad operand type for unary -: '{}'",
                        other.type_name()
                    ))),
                },
            }
        }
        Expr::BinaryOp { op: Op::And, left, right } => {
            let l = evaluate(left, lookup)?;
            if l.truthy() { evaluate(right, lookup) } else { Ok(l) }
        }
        Expr::BinaryOp { op: Op::Or, left, right } => {
            let l = evaluate(left, lookup)?;
            if l.truthy() { Ok(l) } else { evaluate(right, lookup) }
        }
        Expr::BinaryOp { op, left, right } => {
            let l = evaluate(left, lookup)?;
            let r = evaluate(right, lookup)?;
            Ok(binary(*op, &l, &r)?)
        }
        Expr::Conditional { condition, then, otherwise } => {
            if evaluate(condition, lookup)?.truthy() {
                evaluate(then, lookup)
            } else {
                evaluate(otherwise, lookup)
            }
        }
    }
}

fn call<L: SettingLookup + ?Sized>(name: &str, args: &[Expr], lookup: &mut L) -> Result<Value, EvalError> {
    match name {
        "extruderValue" => {
            let [position, key] = args else {
                return Err(EvalError::Failed("extruderValue() takes 2 arguments".to_string()));
            };
            let position = evaluate(position, lookup)?.to_number()?;
            let key = key_argument(name, key, lookup)?;
            let position = position.round() as i64;
            // Unknown or unset positions read the shared value
            let context = match u32::try_from(position) {
                Ok(p) if lookup.extruder_positions().contains(&p) => Context::Extruder(p),
                _ => Context::Global,
            };
            lookup.value_in(&key, context)
        }
        "extruderValues" => {
            let [key] = args else {
                return Err(EvalError::Failed("extruderValues() takes 1 argument".to_string()));
            };
            let key = key_argument(name, key, lookup)?;
            let positions = lookup.extruder_positions();
            if positions.is_empty() {
                return Ok(Value::List(vec![lookup.value_in(&key, Context::Global)?]));
            }
            positions
                .into_iter()
                .map(|p| lookup.value_in(&key, Context::Extruder(p)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        "resolveOrValue" => {
            let [key] = args else {
                return Err(EvalError::Failed("resolveOrValue() takes 1 argument".to_string()));
            };
            let key = key_argument(name, key, lookup)?;
            lookup.value_in(&key, Context::Global)
        }
        _ if is_known_function(name) => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, lookup))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(call_builtin(name, values)?)
        }
        _ => Err(EvalError::Failed(format!("unknown function '{}'", name))),
    }
}

fn key_argument<L: SettingLookup + ?Sized>(name: &str, arg: &Expr, lookup: &mut L) -> Result<String, EvalError> {
    match evaluate(arg, lookup)? {
        Value::Text(key) => Ok(key),
        other => Err(EvalError::Failed(format!(
            "{}() expects a setting name, got '{}'",
            name,
            other.type_name()
        ))),
    }
}

// -----------------------------------------------------------------------------
// Operators
// -----------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Num {
    I(i64),
    F(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Int(i) => Some(Num::I(*i)),
            Value::Bool(b) => Some(Num::I(*b as i64)),
            Value::Float(f) => Some(Num::F(*f)),
            _ => None,
        }
    }

    fn float(self) -> f64 {
        match self {
            Num::I(i) => i as f64,
            Num::F(f) => f,
        }
    }
}

fn binary(op: Op, l: &Value, r: &Value) -> Result<Value, String> {
    match op {
        Op::Eq => Ok(Value::Bool(values_equal(l, r))),
        Op::NotEq => Ok(Value::Bool(!values_equal(l, r))),
        Op::Lt => Ok(Value::Bool(compare_values(l, r)?.is_lt())),
        Op::Gt => Ok(Value::Bool(compare_values(l, r)?.is_gt())),
        Op::LtEq => Ok(Value::Bool(compare_values(l, r)?.is_le())),
        Op::GtEq => Ok(Value::Bool(compare_values(l, r)?.is_ge())),
        Op::In => contains(r, l).map(Value::Bool),
        Op::NotIn => contains(r, l).map(|found| Value::Bool(!found)),
        Op::And | Op::Or => Err("boolean operators are evaluated lazily".to_string()),
        _ => arithmetic(op, l, r),
    }
}

fn arithmetic(op: Op, l: &Value, r: &Value) -> Result<Value, String> {
    // Sequences first: concatenation and repetition
    match (op, l, r) {
        (Op::Add, Value::Text(a), Value::Text(b)) => return Ok(Value::Text(format!("{}{}", a, b))),
        (Op::Add, Value::List(a), Value::List(b)) => {
            return Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()));
        }
        (Op::Mul, Value::Text(s), Value::Int(n)) | (Op::Mul, Value::Int(n), Value::Text(s)) => {
            let count = repeat_count(*n, s.len())?;
            return Ok(Value::Text(s.repeat(count)));
        }
        (Op::Mul, Value::List(items), Value::Int(n)) | (Op::Mul, Value::Int(n), Value::List(items)) => {
            let count = repeat_count(*n, items.len())?;
            return Ok(Value::List(
                std::iter::repeat(items.iter().cloned()).take(count).flatten().collect(),
            ));
        }
        _ => {}
    }

    let (a, b) = match (Num::of(l), Num::of(r)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(format!(
                "unsupported operand types for {}: '{}' and '{}'",
                symbol(op),
                l.type_name(),
                r.type_name()
            ))
        }
    };

    let overflow = || "integer overflow".to_string();
    match (op, a, b) {
        (Op::Add, Num::I(x), Num::I(y)) => x.checked_add(y).map(Value::Int).ok_or_else(overflow),
        (Op::Sub, Num::I(x), Num::I(y)) => x.checked_sub(y).map(Value::Int).ok_or_else(overflow),
        (Op::Mul, Num::I(x), Num::I(y)) => x.checked_mul(y).map(Value::Int).ok_or_else(overflow),
        (Op::Add, _, _) => Ok(Value::Float(a.float() + b.float())),
        (Op::Sub, _, _) => Ok(Value::Float(a.float() - b.float())),
        (Op::Mul, _, _) => Ok(Value::Float(a.float() * b.float())),
        (Op::Div, _, _) => {
            if b.float() == 0.0 {
                return Err("division by zero".to_string());
            }
            Ok(Value::Float(a.float() / b.float()))
        }
        (Op::FloorDiv, Num::I(x), Num::I(y)) => {
            if y == 0 {
                return Err("integer division by zero".to_string());
            }
            // i64::MIN // -1 is the only overflowing quotient
            let q = x.checked_div(y).ok_or_else(overflow)?;
            let r = x.wrapping_rem(y);
            Ok(Value::Int(if r != 0 && ((r < 0) != (y < 0)) { q - 1 } else { q }))
        }
        (Op::FloorDiv, _, _) => {
            if b.float() == 0.0 {
                return Err("float floor division by zero".to_string());
            }
            Ok(Value::Float((a.float() / b.float()).floor()))
        }
        (Op::Mod, Num::I(x), Num::I(y)) => {
            if y == 0 {
                return Err("integer modulo by zero".to_string());
            }
            let r = x.wrapping_rem(y);
            Ok(Value::Int(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }))
        }
        (Op::Mod, _, _) => {
            let (x, y) = (a.float(), b.float());
            if y == 0.0 {
                return Err("float modulo".to_string());
            }
            Ok(Value::Float(x - y * (x / y).floor()))
        }
        (Op::Pow, Num::I(x), Num::I(y)) if y >= 0 => u32::try_from(y)
            .ok()
            .and_then(|exp| x.checked_pow(exp))
            .map(Value::Int)
            .ok_or_else(overflow),
        (Op::Pow, _, _) => {
            let (x, y) = (a.float(), b.float());
            if x == 0.0 && y < 0.0 {
                return Err("0.0 cannot be raised to a negative power".to_string());
            }
            Ok(Value::Float(x.powf(y)))
        }
        _ => Err(format!("operator {} is not arithmetic", symbol(op))),
    }
}

/// Upper bound on the length of a repeated string or list.
const MAX_REPEAT_LEN: usize = 1 << 20;

/// Copies for `seq * n`; negative counts give an empty result.
fn repeat_count(n: i64, unit_len: usize) -> Result<usize, String> {
    if unit_len == 0 {
        return Ok(0);
    }
    let count = usize::try_from(n.max(0)).map_err(|_| "repetition result too large".to_string())?;
    match count.checked_mul(unit_len) {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(count),
        _ => Err("repetition result too large".to_string()),
    }
}

/// Equality with numeric cross-type comparison (1 == 1.0 == True).
fn values_equal(l: &Value, r: &Value) -> bool {
    match (Num::of(l), Num::of(r)) {
        (Some(a), Some(b)) => a.float() == b.float(),
        _ => match (l, r) {
            (Value::List(xs), Value::List(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(x, y)| values_equal(x, y))
            }
            _ => l == r,
        },
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, String> {
    match (container, item) {
        (Value::List(items), _) => Ok(items.iter().any(|candidate| values_equal(candidate, item))),
        (Value::Text(haystack), Value::Text(needle)) => Ok(haystack.contains(needle.as_str())),
        _ => Err(format!(
            "argument of type '{}' is not iterable",
            container.type_name()
        )),
    }
}

fn symbol(op: Op) -> &'static str {
    match op {
        Op::Add => "+",
        Op::Sub => "-",
        Op::Mul => "*",
        Op::Div => "/",
        Op::FloorDiv => "//",
        Op::Mod => "%",
        Op::Pow => "**",
        Op::Eq => "==",
        Op::NotEq => "!=",
        Op::Lt => "<",
        Op::Gt => ">",
        Op::LtEq => "<=",
        Op::GtEq => ">=",
        Op::In => "in",
        Op::NotIn => "not in",
        Op::And => "and",
        Op::Or => "or",
    }
}
