// Formula parser - converts formula strings into AST
// Supports: numbers, strings, booleans, cell refs (A1), ranges (A1:B5), functions (SUM),
// arithmetic (+ - * / ^ %), comparison (< > = <= >= <>) and concatenation (&)

use calcgrid_core::{letters_to_col, CellId, Range};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Boolean(bool),
    CellRef(CellId),
    Range(Range),
    Function {
        name: String,
        args: Vec<Expr>,
    },
    BinaryOp {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Empty/omitted argument (e.g. the trailing slot in `=IF(a,b,)`)
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Pow,     // ^
    // Comparison
    Lt,      // <
    Gt,      // >
    Eq,      // =
    LtEq,    // <=
    GtEq,    // >=
    NotEq,   // <>
    // String
    Concat,  // &
}

/// Parse a formula string (leading `=` required) into an AST.
pub fn parse(formula: &str) -> Result<Expr, String> {
    let formula = formula.trim();
    let Some(input) = formula.strip_prefix('=') else {
        return Err("Formula must start with =".to_string());
    };

    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("Empty formula".to_string());
    }
    let (expr, pos) = parse_expr(&tokens, 0, 0)?;
    if pos < tokens.len() {
        return Err(format!("Unexpected token at position {}", pos));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    StringLit(String),
    CellRef(CellId),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Colon,
    Comma,
    Lt,
    Gt,
    Eq,
    LtEq,
    GtEq,
    NotEq,
    Ampersand,
    Caret,
    Percent,
}

fn punctuation(c: char) -> Option<Token> {
    let token = match c {
        '+' => Token::Plus,
        '-' => Token::Minus,
        '*' => Token::Star,
        '/' => Token::Slash,
        '(' => Token::LParen,
        ')' => Token::RParen,
        ':' => Token::Colon,
        ',' => Token::Comma,
        '&' => Token::Ampersand,
        '^' => Token::Caret,
        '%' => Token::Percent,
        '=' => Token::Eq,
        _ => return None,
    };
    Some(token)
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c == ' ' || c == '\t' {
            chars.next();
            continue;
        }
        if let Some(token) = punctuation(c) {
            tokens.push(token);
            chars.next();
            continue;
        }
        match c {
            '<' => {
                chars.next();
                match chars.peek() {
                    Some('=') => { tokens.push(Token::LtEq); chars.next(); }
                    Some('>') => { tokens.push(Token::NotEq); chars.next(); }
                    _ => tokens.push(Token::Lt),
                }
            }
            '>' => {
                chars.next();
                if let Some(&'=') = chars.peek() {
                    tokens.push(Token::GtEq);
                    chars.next();
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '"' => {
                chars.next(); // opening quote
                let mut s = String::new();
                loop {
                    match chars.next() {
                        // "" inside a literal is an escaped quote
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            s.push('"');
                        }
                        Some('"') => break,
                        Some(ch) => s.push(ch),
                        None => return Err("Unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::StringLit(s));
            }
            'A'..='Z' | 'a'..='z' | '$' => {
                // Cell reference (A1, $B$2) or function name (SUM)
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if let Some(id) = try_parse_cell_ref(&ident) {
                    tokens.push(Token::CellRef(id));
                } else if ident.contains('$') {
                    return Err(format!("Invalid cell reference: {}", ident));
                } else {
                    tokens.push(Token::Ident(ident.to_uppercase()));
                }
            }
            '0'..='9' | '.' => {
                let mut num_str = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num_str.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let num: f64 = num_str.parse().map_err(|_| format!("Invalid number: {}", num_str))?;
                tokens.push(Token::Number(num));
            }
            _ => return Err(format!("Unexpected character: {}", c)),
        }
    }

    Ok(tokens)
}

/// `A1`, `$A$1`, `aa10`. Identifiers such as `SUM` are not references.
fn try_parse_cell_ref(s: &str) -> Option<CellId> {
    let cleaned: String = s.chars().filter(|c| *c != '$').collect();
    let split = cleaned.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cleaned.split_at(split);
    // Spreadsheet columns stop well before four letters in practice
    if letters.len() > 3 {
        return None;
    }
    letters_to_col(letters)?;
    CellId::parse(&cleaned)
}

/// Binding power of each infix operator, loosest first.
fn infix(token: &Token) -> Option<(Op, u8)> {
    let entry = match token {
        Token::Lt => (Op::Lt, 1),
        Token::Gt => (Op::Gt, 1),
        Token::Eq => (Op::Eq, 1),
        Token::LtEq => (Op::LtEq, 1),
        Token::GtEq => (Op::GtEq, 1),
        Token::NotEq => (Op::NotEq, 1),
        Token::Ampersand => (Op::Concat, 2),
        Token::Plus => (Op::Add, 3),
        Token::Minus => (Op::Sub, 3),
        Token::Star => (Op::Mul, 4),
        Token::Slash => (Op::Div, 4),
        Token::Caret => (Op::Pow, 5),
        _ => return None,
    };
    Some(entry)
}

/// Precedence climbing over [`infix`]. `^` is right-associative, the rest
/// fold to the left.
fn parse_expr(tokens: &[Token], pos: usize, min_power: u8) -> Result<(Expr, usize), String> {
    let (mut lhs, mut pos) = parse_percent(tokens, pos)?;

    while let Some((op, power)) = tokens.get(pos).and_then(infix) {
        if power < min_power {
            break;
        }
        let next_min = if op == Op::Pow { power } else { power + 1 };
        let (rhs, next) = parse_expr(tokens, pos + 1, next_min)?;
        lhs = binary(op, lhs, rhs);
        pos = next;
    }

    Ok((lhs, pos))
}

// Postfix percent desugars to * 0.01
fn parse_percent(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut expr, mut pos) = parse_primary(tokens, pos)?;

    while let Some(Token::Percent) = tokens.get(pos) {
        expr = binary(Op::Mul, expr, Expr::Number(0.01));
        pos += 1;
    }

    Ok((expr, pos))
}

fn parse_primary(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let Some(token) = tokens.get(pos) else {
        return Err("Unexpected end of expression".to_string());
    };

    match token {
        Token::Number(n) => Ok((Expr::Number(*n), pos + 1)),
        Token::StringLit(s) => Ok((Expr::Text(s.clone()), pos + 1)),
        Token::CellRef(start) => {
            if let (Some(Token::Colon), Some(Token::CellRef(end))) = (tokens.get(pos + 1), tokens.get(pos + 2)) {
                return Ok((Expr::Range(Range::from_corners(*start, *end)), pos + 3));
            }
            Ok((Expr::CellRef(*start), pos + 1))
        }
        Token::Ident(name) => {
            if let Some(Token::LParen) = tokens.get(pos + 1) {
                let (args, new_pos) = parse_function_args(tokens, pos + 2)?;
                return Ok((Expr::Function { name: name.clone(), args }, new_pos));
            }
            match name.as_str() {
                "TRUE" => Ok((Expr::Boolean(true), pos + 1)),
                "FALSE" => Ok((Expr::Boolean(false), pos + 1)),
                // Unknown bare identifiers evaluate to #NAME?
                _ => Ok((Expr::Function { name: name.clone(), args: Vec::new() }, pos + 1)),
            }
        }
        Token::LParen => {
            let (expr, pos) = parse_expr(tokens, pos + 1, 0)?;
            match tokens.get(pos) {
                Some(Token::RParen) => Ok((expr, pos + 1)),
                Some(_) => Err("Expected closing parenthesis".to_string()),
                None => Err("Missing closing parenthesis".to_string()),
            }
        }
        // Unary plus is a no-op
        Token::Plus => parse_percent(tokens, pos + 1),
        Token::Minus => {
            let (expr, pos) = parse_percent(tokens, pos + 1)?;
            Ok((binary(Op::Sub, Expr::Number(0.0), expr), pos))
        }
        _ => Err(format!("Unexpected token at position {}", pos)),
    }
}

fn parse_function_args(tokens: &[Token], pos: usize) -> Result<(Vec<Expr>, usize), String> {
    let mut args = Vec::new();
    let mut pos = pos;

    // SUM()
    if let Some(Token::RParen) = tokens.get(pos) {
        return Ok((args, pos + 1));
    }

    loop {
        // Empty argument: next token is , or ) immediately
        match tokens.get(pos) {
            Some(Token::Comma) => {
                args.push(Expr::Empty);
                pos += 1;
                continue;
            }
            Some(Token::RParen) => {
                args.push(Expr::Empty);
                return Ok((args, pos + 1));
            }
            _ => {}
        }

        let (arg, new_pos) = parse_expr(tokens, pos, 0)?;
        args.push(arg);
        pos = new_pos;

        match tokens.get(pos) {
            Some(Token::RParen) => return Ok((args, pos + 1)),
            Some(Token::Comma) => pos += 1,
            Some(_) => return Err("Expected comma or closing parenthesis".to_string()),
            None => return Err("Missing closing parenthesis in function call".to_string()),
        }
    }
}

fn binary(op: Op, left: Expr, right: Expr) -> Expr {
    Expr::BinaryOp { op, left: Box::new(left), right: Box::new(right) }
}
