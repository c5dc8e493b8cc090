// Formula parser - converts setting formulas into an AST
// Supports: numbers, strings, True/False/None, list literals, setting keys,
// function calls (min, max, math.ceil, extruderValue, ...), arithmetic
// (+ - * / // % **), comparisons (== != < > <= >=, chained), membership
// (in, not in), boolean logic (and, or, not) and `a if cond else b`.

use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    /// Reference to another setting, resolved through the whole stack
    Key(String),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BinaryOp {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv, // //
    Mod,
    Pow,      // **
    // Comparison
    Eq,       // ==
    NotEq,    // !=
    Lt,
    Gt,
    LtEq,
    GtEq,
    // Membership
    In,
    NotIn,
    // Boolean (short-circuit)
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl Expr {
    /// Fold a constant tree (literals and list literals only) into a value.
    pub fn as_literal(&self) -> Option<Value> {
        match self {
            Expr::Literal(v) => Some(v.clone()),
            Expr::List(items) => items
                .iter()
                .map(|item| item.as_literal())
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            Expr::Unary { op: UnaryOp::Neg, operand } => match operand.as_literal()? {
                Value::Int(i) => Some(Value::Int(-i)),
                Value::Float(f) => Some(Value::Float(-f)),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Parse a formula into an AST.
///
/// Unlike spreadsheet formulas there is no leading `=`; container files mark
/// formulas with `=` and strip it before calling this.
pub fn parse(formula: &str) -> Result<Expr, String> {
    let tokens = tokenize(formula.trim())?;
    if tokens.is_empty() {
        return Err("Empty formula".to_string());
    }
    let (expr, pos) = parse_conditional(&tokens, 0, 0)?;
    if pos < tokens.len() {
        return Err(format!("Unexpected token {:?}", tokens[pos]));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    StringLit(String),
    Ident(String),
    // Keywords
    And,
    Or,
    Not,
    In,
    If,
    Else,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => { chars.next(); }
            '+' => { tokens.push(Token::Plus); chars.next(); }
            '-' => { tokens.push(Token::Minus); chars.next(); }
            '%' => { tokens.push(Token::Percent); chars.next(); }
            '(' => { tokens.push(Token::LParen); chars.next(); }
            ')' => { tokens.push(Token::RParen); chars.next(); }
            '[' => { tokens.push(Token::LBracket); chars.next(); }
            ']' => { tokens.push(Token::RBracket); chars.next(); }
            ',' => { tokens.push(Token::Comma); chars.next(); }
            '*' => {
                chars.next();
                if chars.peek() == Some(&'*') {
                    chars.next();
                    tokens.push(Token::DoubleStar);
                } else {
                    tokens.push(Token::Star);
                }
            }
            '/' => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    tokens.push(Token::DoubleSlash);
                } else {
                    tokens.push(Token::Slash);
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::LtEq);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::GtEq);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '=' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err("Assignment is not allowed in formulas (use ==)".to_string());
                }
                tokens.push(Token::EqEq);
            }
            '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err("Unexpected character: !".to_string());
                }
                tokens.push(Token::NotEq);
            }
            '"' | '\'' => {
                let quote = c;
                chars.next(); // consume opening quote
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => return Err("Unterminated string literal".to_string()),
                        },
                        Some(ch) => s.push(ch),
                        None => return Err("Unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::StringLit(s));
            }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                let mut is_float = false;
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        num_str.push(d);
                        chars.next();
                    } else if d == '.' {
                        is_float = true;
                        num_str.push(d);
                        chars.next();
                    } else if d == 'e' || d == 'E' {
                        // Exponent, optionally signed
                        is_float = true;
                        num_str.push(d);
                        chars.next();
                        if let Some(&sign) = chars.peek() {
                            if sign == '+' || sign == '-' {
                                num_str.push(sign);
                                chars.next();
                            }
                        }
                    } else {
                        break;
                    }
                }
                if is_float {
                    let num: f64 = num_str.parse().map_err(|_| format!("Invalid number: {}", num_str))?;
                    tokens.push(Token::Float(num));
                } else {
                    let num: i64 = num_str.parse().map_err(|_| format!("Invalid number: {}", num_str))?;
                    tokens.push(Token::Int(num));
                }
            }
            'A'..='Z' | 'a'..='z' | '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else if ch == '.' {
                        // Dotted names (math.ceil); a dot must be followed by a letter
                        let mut lookahead = chars.clone();
                        lookahead.next();
                        match lookahead.peek() {
                            Some(&next) if next.is_ascii_alphabetic() || next == '_' => {
                                ident.push('.');
                                chars.next();
                            }
                            _ => break,
                        }
                    } else {
                        break;
                    }
                }
                tokens.push(match ident.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "if" => Token::If,
                    "else" => Token::Else,
                    _ => Token::Ident(ident),
                });
            }
            _ => return Err(format!("Unexpected character: {}", c)),
        }
    }

    Ok(tokens)
}

/// Nesting limit for brackets, calls, prefix operators and chained `**` / `else`.
const MAX_NESTING: usize = 64;

fn check_depth(depth: usize) -> Result<(), String> {
    if depth > MAX_NESTING {
        return Err("Formula nested too deeply".to_string());
    }
    Ok(())
}

// Lowest precedence: `a if cond else b` (right-associative in the else branch)
fn parse_conditional(tokens: &[Token], pos: usize, depth: usize) -> Result<(Expr, usize), String> {
    check_depth(depth)?;
    let (then, pos) = parse_or(tokens, pos, depth)?;
    if tokens.get(pos) != Some(&Token::If) {
        return Ok((then, pos));
    }
    let (condition, pos) = parse_or(tokens, pos + 1, depth)?;
    if tokens.get(pos) != Some(&Token::Else) {
        return Err("Conditional expression requires 'else'".to_string());
    }
    let (otherwise, pos) = parse_conditional(tokens, pos + 1, depth + 1)?;
    Ok((
        Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        },
        pos,
    ))
}

fn parse_or(tokens: &[Token], pos: usize, depth: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_and(tokens, pos, depth)?;
    while tokens.get(pos) == Some(&Token::Or) {
        let (right, new_pos) = parse_and(tokens, pos + 1, depth)?;
        left = binary(Op::Or, left, right);
        pos = new_pos;
    }
    Ok((left, pos))
}

fn parse_and(tokens: &[Token], pos: usize, depth: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_not(tokens, pos, depth)?;
    while tokens.get(pos) == Some(&Token::And) {
        let (right, new_pos) = parse_not(tokens, pos + 1, depth)?;
        left = binary(Op::And, left, right);
        pos = new_pos;
    }
    Ok((left, pos))
}

fn parse_not(tokens: &[Token], pos: usize, depth: usize) -> Result<(Expr, usize), String> {
    check_depth(depth)?;
    if tokens.get(pos) == Some(&Token::Not) {
        let (operand, pos) = parse_not(tokens, pos + 1, depth + 1)?;
        return Ok((
            Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            },
            pos,
        ));
    }
    parse_comparison(tokens, pos, depth)
}

// Comparisons chain: `a < b <= c` means `a < b and b <= c`
fn parse_comparison(tokens: &[Token], pos: usize, depth: usize) -> Result<(Expr, usize), String> {
    let (first, mut pos) = parse_add_sub(tokens, pos, depth)?;
    let mut operands = vec![first];
    let mut ops = Vec::new();

    loop {
        let (op, width) = match tokens.get(pos) {
            Some(Token::EqEq) => (Op::Eq, 1),
            Some(Token::NotEq) => (Op::NotEq, 1),
            Some(Token::Lt) => (Op::Lt, 1),
            Some(Token::Gt) => (Op::Gt, 1),
            Some(Token::LtEq) => (Op::LtEq, 1),
            Some(Token::GtEq) => (Op::GtEq, 1),
            Some(Token::In) => (Op::In, 1),
            Some(Token::Not) if tokens.get(pos + 1) == Some(&Token::In) => (Op::NotIn, 2),
            _ => break,
        };
        let (right, new_pos) = parse_add_sub(tokens, pos + width, depth)?;
        ops.push(op);
        operands.push(right);
        pos = new_pos;
    }

    if ops.is_empty() {
        return Ok((operands.remove(0), pos));
    }

    let mut chain: Option<Expr> = None;
    for (i, op) in ops.into_iter().enumerate() {
        let link = binary(op, operands[i].clone(), operands[i + 1].clone());
        chain = Some(match chain {
            None => link,
            Some(prev) => binary(Op::And, prev, link),
        });
    }
    chain.map(|expr| (expr, pos)).ok_or_else(|| "Empty comparison".to_string())
}

fn parse_add_sub(tokens: &[Token], pos: usize, depth: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_mul_div(tokens, pos, depth)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Plus => Op::Add,
            Token::Minus => Op::Sub,
            _ => break,
        };
        let (right, new_pos) = parse_mul_div(tokens, pos + 1, depth)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_mul_div(tokens: &[Token], pos: usize, depth: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_unary(tokens, pos, depth)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Star => Op::Mul,
            Token::Slash => Op::Div,
            Token::DoubleSlash => Op::FloorDiv,
            Token::Percent => Op::Mod,
            _ => break,
        };
        let (right, new_pos) = parse_unary(tokens, pos + 1, depth)?;
        left = binary(op, left, right);
        pos = new_pos;
    }

    Ok((left, pos))
}

// Unary minus binds looser than **: -2 ** 2 == -4
fn parse_unary(tokens: &[Token], pos: usize, depth: usize) -> Result<(Expr, usize), String> {
    check_depth(depth)?;
    match tokens.get(pos) {
        Some(Token::Minus) => {
            let (operand, pos) = parse_unary(tokens, pos + 1, depth + 1)?;
            Ok((
                Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
                pos,
            ))
        }
        // Unary plus is a no-op
        Some(Token::Plus) => parse_unary(tokens, pos + 1, depth + 1),
        _ => parse_power(tokens, pos, depth),
    }
}

// Exponentiation (**) - right-associative
fn parse_power(tokens: &[Token], pos: usize, depth: usize) -> Result<(Expr, usize), String> {
    let (base, pos) = parse_primary(tokens, pos, depth)?;

    if tokens.get(pos) == Some(&Token::DoubleStar) {
        // The exponent may itself carry a sign: 2 ** -1
        let (exponent, new_pos) = parse_unary(tokens, pos + 1, depth + 1)?;
        return Ok((binary(Op::Pow, base, exponent), new_pos));
    }

    Ok((base, pos))
}

fn parse_primary(tokens: &[Token], pos: usize, depth: usize) -> Result<(Expr, usize), String> {
    if pos >= tokens.len() {
        return Err("Unexpected end of expression".to_string());
    }

    match &tokens[pos] {
        Token::Int(n) => Ok((Expr::Literal(Value::Int(*n)), pos + 1)),
        Token::Float(n) => Ok((Expr::Literal(Value::Float(*n)), pos + 1)),
        Token::StringLit(s) => Ok((Expr::Literal(Value::Text(s.clone())), pos + 1)),
        Token::Ident(name) => {
            match name.as_str() {
                "True" => return Ok((Expr::Literal(Value::Bool(true)), pos + 1)),
                "False" => return Ok((Expr::Literal(Value::Bool(false)), pos + 1)),
                "None" => return Ok((Expr::Literal(Value::Empty), pos + 1)),
                "math.pi" => return Ok((Expr::Literal(Value::Float(std::f64::consts::PI)), pos + 1)),
                _ => {}
            }
            // Function call
            if tokens.get(pos + 1) == Some(&Token::LParen) {
                let (args, new_pos) = parse_sequence(tokens, pos + 2, Token::RParen, depth + 1)?;
                return Ok((
                    Expr::Call {
                        name: name.clone(),
                        args,
                    },
                    new_pos,
                ));
            }
            // Not a call - a reference to another setting
            Ok((Expr::Key(name.clone()), pos + 1))
        }
        Token::LParen => {
            let (expr, pos) = parse_conditional(tokens, pos + 1, depth + 1)?;
            match tokens.get(pos) {
                Some(Token::RParen) => Ok((expr, pos + 1)),
                Some(_) => Err("Expected closing parenthesis".to_string()),
                None => Err("Missing closing parenthesis".to_string()),
            }
        }
        Token::LBracket => {
            let (items, pos) = parse_sequence(tokens, pos + 1, Token::RBracket, depth + 1)?;
            Ok((Expr::List(items), pos))
        }
        other => Err(format!("Unexpected token {:?}", other)),
    }
}

/// Comma-separated expressions up to `close`. Accepts a trailing comma.
fn parse_sequence(tokens: &[Token], pos: usize, close: Token, depth: usize) -> Result<(Vec<Expr>, usize), String> {
    let mut items = Vec::new();
    let mut pos = pos;

    if tokens.get(pos) == Some(&close) {
        return Ok((items, pos + 1));
    }

    loop {
        let (item, new_pos) = parse_conditional(tokens, pos, depth)?;
        items.push(item);
        pos = new_pos;

        match tokens.get(pos) {
            Some(Token::Comma) => {
                pos += 1;
                if tokens.get(pos) == Some(&close) {
                    return Ok((items, pos + 1));
                }
            }
            Some(t) if *t == close => return Ok((items, pos + 1)),
            Some(t) => return Err(format!("Expected ',' or {:?}, found {:?}", close, t)),
            None => return Err(format!("Missing {:?}", close)),
        }
    }
}

fn binary(op: Op, left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
