use crate::error::CompileError;
use logos::{FilterResult, Lexer, Logos};

/// Tokens for botscript
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"([ \t\r\n\f]+|//[^\n]*)")]
pub enum Token {
    /// Never emitted; the callback skips to the closing `*/`
    #[token("/*", block_comment)]
    BlockComment,

    // Keywords
    #[token("let")]
    Let,
    #[token("const")]
    Const,
    #[token("var")]
    Var,
    #[token("function")]
    Function,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("for")]
    For,
    #[token("of")]
    Of,
    #[token("in")]
    In,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("throw")]
    Throw,
    #[token("try")]
    Try,
    #[token("catch")]
    Catch,
    #[token("finally")]
    Finally,
    #[token("new")]
    New,
    #[token("typeof")]
    Typeof,
    #[token("delete")]
    Delete,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("undefined")]
    Undefined,
    #[token("this")]
    This,

    // Identifiers and literals
    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*", |lex| lex.slice().to_string())]
    Identifier(String),

    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"0[xX][0-9a-fA-F]+", |lex| i64::from_str_radix(&lex.slice()[2..], 16).ok().map(|n| n as f64))]
    Number(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(strip_quotes(lex.slice())))]
    #[regex(r"'([^'\\\n]|\\.)*'", |lex| unescape(strip_quotes(lex.slice())))]
    Str(String),

    #[regex(r"`([^`\\]|\\.)*`", |lex| strip_quotes(lex.slice()).to_string())]
    Template(String),

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("**")]
    StarStar,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("??=")]
    NullishAssign,
    #[token("==")]
    EqEq,
    #[token("===")]
    EqEqEq,
    #[token("!=")]
    NotEq,
    #[token("!==")]
    NotEqEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("??")]
    Nullish,
    #[token("!")]
    Bang,
    #[token("?")]
    Question,
    #[token("?.")]
    QuestionDot,
    #[token("=>")]
    Arrow,
    #[token("...")]
    Ellipsis,

    // Delimiters
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    // Punctuation
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,

    // End of input
    Eof,
}

fn strip_quotes(s: &str) -> &str {
    &s[1..s.len() - 1]
}

/// Resolve backslash escapes in a string literal body
pub(crate) fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(ch) => out.push(ch),
                    None => out.push_str(&hex),
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// A token with its source position
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub line: u32,
    pub column: u32,
}

/// Tokenize the whole source, appending [`Token::Eof`]
fn block_comment(lex: &mut Lexer<Token>) -> FilterResult<(), ()> {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            FilterResult::Skip
        }
        None => FilterResult::Error(()),
    }
}

pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, CompileError> {
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(source.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    let position = |offset: usize| -> (u32, u32) {
        let line = line_starts.partition_point(|&start| start <= offset);
        let start = line_starts[line.saturating_sub(1)];
        (line as u32, (offset - start + 1) as u32)
    };

    let mut lex = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lex.next() {
        let (line, column) = position(lex.span().start);
        match result {
            Ok(token) => tokens.push(SpannedToken { token, line, column }),
            Err(_) => {
                return Err(CompileError {
                    message: format!("Invalid or unexpected token '{}'", lex.slice()),
                    line,
                    column,
                })
            }
        }
    }
    let (line, column) = position(source.len());
    tokens.push(SpannedToken {
        token: Token::Eof,
        line,
        column,
    });
    Ok(tokens)
}
