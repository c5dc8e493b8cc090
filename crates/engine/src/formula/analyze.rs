// Formula analysis utilities
//
// Static analysis of formula ASTs without evaluation. Used to report
// references to keys outside the universe before anything is evaluated.

use super::parser::Expr;
use crate::value::Value;

/// Setting keys a formula can read, in first-occurrence order.
///
/// Includes bare references and literal key arguments of the context
/// functions (`extruderValue(0, "key")`). Keys passed as computed strings
/// cannot be known statically and are skipped.
pub fn referenced_keys(expr: &Expr) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    walk_expr(expr, &mut |key| {
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    });
    keys
}

/// Walk the AST and call the visitor for each referenced key.
fn walk_expr<F: FnMut(&str)>(expr: &Expr, visitor: &mut F) {
    match expr {
        Expr::Key(key) => visitor(key),
        Expr::Call { name, args } => {
            let key_arg = match name.as_str() {
                "extruderValue" => args.get(1),
                "extruderValues" | "resolveOrValue" => args.first(),
                _ => None,
            };
            if let Some(Expr::Literal(Value::Text(key))) = key_arg {
                visitor(key);
            }
            for arg in args {
                walk_expr(arg, visitor);
            }
        }
        Expr::List(items) => {
            for item in items {
                walk_expr(item, visitor);
            }
        }
        Expr::Unary { operand, .. } => walk_expr(operand, visitor),
        Expr::BinaryOp { left, right, .. } => {
            walk_expr(left, visitor);
            walk_expr(right, visitor);
        }
        Expr::Conditional { condition, then, otherwise } => {
            walk_expr(then, visitor);
            walk_expr(condition, visitor);
            walk_expr(otherwise, visitor);
        }
        Expr::Literal(_) => {}
    }
}
