//! Band-math expressions over composited tile bands.
//!
//! Expressions reference bands by name (`nir`, `cog_1`, ...), support
//! `+ - * /`, unary minus, parentheses and numeric literals, and may
//! contain several `;`-separated sub-expressions, each producing one
//! output band named after its source text.

use std::collections::HashMap;

use crate::image::{ImageError, TileImage};

/// Errors from parsing or evaluating a band-math expression.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ExpressionError {
    /// A character outside the expression grammar.
    #[error("Unexpected character '{0}' in expression")]
    UnexpectedChar(char),

    /// A token in a position the grammar does not allow.
    #[error("Unexpected token '{0}' in expression")]
    UnexpectedToken(String),

    /// The expression ended mid-term.
    #[error("Expression ended unexpectedly")]
    UnexpectedEnd,

    /// The expression is empty.
    #[error("Empty expression")]
    Empty,

    /// An identifier that matches no band of the evaluated image.
    #[error("Expression references unknown band '{0}'")]
    UnknownBand(String),

    /// The evaluated result could not be assembled into an image.
    #[error(transparent)]
    Image(#[from] ImageError),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = literal
                    .parse()
                    .map_err(|_| ExpressionError::UnexpectedToken(literal))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(ExpressionError::UnexpectedChar(other)),
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Band(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    /// expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.next();
                    left = Expr::Add(Box::new(left), Box::new(self.term()?));
                }
                Token::Minus => {
                    self.next();
                    left = Expr::Sub(Box::new(left), Box::new(self.term()?));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    /// term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.factor()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.next();
                    left = Expr::Mul(Box::new(left), Box::new(self.factor()?));
                }
                Token::Slash => {
                    self.next();
                    left = Expr::Div(Box::new(left), Box::new(self.factor()?));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    /// factor := '-' factor | '(' expr ')' | number | ident
    fn factor(&mut self) -> Result<Expr, ExpressionError> {
        match self.next().ok_or(ExpressionError::UnexpectedEnd)? {
            Token::Minus => Ok(Expr::Neg(Box::new(self.factor()?))),
            Token::LParen => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(token) => Err(ExpressionError::UnexpectedToken(format!("{token:?}"))),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            Token::Number(value) => Ok(Expr::Number(value)),
            Token::Ident(name) => Ok(Expr::Band(name)),
            token => Err(ExpressionError::UnexpectedToken(format!("{token:?}"))),
        }
    }
}

fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExpressionError::Empty);
    }
    let mut parser = Parser {
        tokens,
        position: 0,
    };
    let expr = parser.expr()?;
    if let Some(trailing) = parser.peek() {
        return Err(ExpressionError::UnexpectedToken(format!("{trailing:?}")));
    }
    Ok(expr)
}

fn sub_expressions(input: &str) -> impl Iterator<Item = &str> {
    input.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// The asset names an expression reads from, in first-appearance order.
///
/// Identifiers are matched against `known` either verbatim or as the
/// `{asset}_{index}` band labels the compositor produces. Identifiers
/// matching nothing are ignored here; evaluation reports them as
/// [`ExpressionError::UnknownBand`].
pub fn referenced_assets(expression: &str, known: &[&str]) -> Result<Vec<String>, ExpressionError> {
    let mut assets: Vec<String> = Vec::new();
    for sub in sub_expressions(expression) {
        for token in tokenize(sub)? {
            let Token::Ident(ident) = token else {
                continue;
            };
            let matched = if known.contains(&ident.as_str()) {
                Some(ident)
            } else {
                ident
                    .rsplit_once('_')
                    .filter(|(prefix, index)| {
                        !index.is_empty()
                            && index.bytes().all(|b| b.is_ascii_digit())
                            && known.contains(prefix)
                    })
                    .map(|(prefix, _)| prefix.to_string())
            };
            if let Some(asset) = matched {
                if !assets.contains(&asset) {
                    assets.push(asset);
                }
            }
        }
    }
    Ok(assets)
}

fn evaluate(expr: &Expr, bands: &HashMap<&str, &[f64]>, pixel: usize) -> f64 {
    match expr {
        Expr::Number(value) => *value,
        Expr::Band(name) => bands[name.as_str()][pixel],
        Expr::Neg(inner) => -evaluate(inner, bands, pixel),
        Expr::Add(left, right) => evaluate(left, bands, pixel) + evaluate(right, bands, pixel),
        Expr::Sub(left, right) => evaluate(left, bands, pixel) - evaluate(right, bands, pixel),
        Expr::Mul(left, right) => evaluate(left, bands, pixel) * evaluate(right, bands, pixel),
        Expr::Div(left, right) => evaluate(left, bands, pixel) / evaluate(right, bands, pixel),
    }
}

fn band_references<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Band(name) => out.push(name),
        Expr::Neg(inner) => band_references(inner, out),
        Expr::Add(left, right)
        | Expr::Sub(left, right)
        | Expr::Mul(left, right)
        | Expr::Div(left, right) => {
            band_references(left, out);
            band_references(right, out);
        }
    }
}

/// Evaluates `expression` over `image`, producing one band per
/// `;`-separated sub-expression.
///
/// The output keeps the input mask; pixels whose result is not finite
/// (division by zero and friends) are additionally masked out. Declared
/// dataset statistics do not survive derivation.
pub fn apply_expression(
    image: &TileImage,
    expression: &str,
) -> Result<TileImage, ExpressionError> {
    let parsed: Vec<(String, Expr)> = sub_expressions(expression)
        .map(|sub| Ok((sub.to_string(), parse(sub)?)))
        .collect::<Result<_, ExpressionError>>()?;
    if parsed.is_empty() {
        return Err(ExpressionError::Empty);
    }

    let mut bands: HashMap<&str, &[f64]> = HashMap::new();
    for (_, expr) in &parsed {
        let mut referenced = Vec::new();
        band_references(expr, &mut referenced);
        for band in referenced {
            let samples = image
                .band_by_name(band)
                .ok_or_else(|| ExpressionError::UnknownBand(band.to_string()))?;
            bands.insert(band, samples);
        }
    }

    let pixels = image.width() as usize * image.height() as usize;
    let mut out_bands = Vec::with_capacity(parsed.len());
    let mut mask = image.mask().to_vec();
    for (_, expr) in &parsed {
        let mut samples = Vec::with_capacity(pixels);
        for pixel in 0..pixels {
            let value = evaluate(expr, &bands, pixel);
            if !value.is_finite() {
                mask[pixel] = false;
            }
            samples.push(value);
        }
        out_bands.push(samples);
    }

    let names = parsed.into_iter().map(|(name, _)| name).collect();
    let mut derived = TileImage::new(image.width(), image.height(), out_bands, mask, names)?;
    derived.metadata = image.metadata.clone();
    Ok(derived)
}
