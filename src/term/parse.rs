//! Prolog-syntax reader for terms, clauses, queries and programs.
//!
//! Two chumsky passes over the input:
//! 1. **Lex**: characters to [`Token`]s with byte spans. Comments (`% line`
//!    and `/* block */`) and whitespace are dropped here.
//! 2. **Parse**: tokens to [`Term`]s, one parser per priority level of the
//!    operator table below.
//!
//! | priority | type | operators |
//! |---|---|---|
//! | 1200 | xfx | `:-` |
//! | 1100 | xfy | `;` |
//! | 1000 | xfy | `,` |
//! | 900 | fy | `\+` |
//! | 700 | xfx | `=` `\=` `==` `\==` `<` `>` `=<` `>=` `=:=` `=\=` `is` |
//! | 500 | yfx | `+` `-` |
//! | 400 | yfx | `*` `/` `//` `mod` |
//! | 200 | fy | `-` |

use std::cell::Cell;
use std::fmt;
use std::ops::Range;

use chumsky::prelude::*;
use chumsky::error::SimpleReason;
use chumsky::stream::Stream;
use miette::SourceSpan;

use super::{LIST_NIL, Term};
use crate::error::ParseError;

type Span = Range<usize>;
type LexError = Simple<char>;
type TokenError = Simple<Token>;
type TermParser<'a> = BoxedParser<'a, Token, Term, TokenError>;

const COMPARISON: &[&str] = &[
    "=", "\\=", "==", "\\==", "<", ">", "=<", ">=", "=:=", "=\\=", "is",
];
const ADDITIVE: &[&str] = &["+", "-"];
const MULTIPLICATIVE: &[&str] = &["*", "/", "//", "mod"];

/// Characters that make up symbolic atoms such as `=<` or `:-`.
pub(crate) fn is_symbol_char(c: char) -> bool {
    "+-*/\\^<>=~:.?@#&$".contains(c)
}

/// A parsed clause: `head.` or `head :- body.`
///
/// The body is the top-level conjunction flattened into goals; a fact has an
/// empty body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub head: Term,
    pub body: Vec<Term>,
}

impl Clause {
    pub fn is_fact(&self) -> bool {
        self.body.is_empty()
    }
}

/// Parse a single term. A trailing `.` is allowed.
pub fn parse_term(src: &str) -> Result<Term, ParseError> {
    let fresh = Cell::new(0);
    let parser = term(&fresh)
        .then_ignore(just(Token::End).or_not())
        .then_ignore(end());
    run(src, parser)
}

/// Parse a query: a goal or a conjunction of goals, optionally prefixed by `?-`.
pub fn parse_query(src: &str) -> Result<Term, ParseError> {
    let fresh = Cell::new(0);
    let parser = name(&["?-"])
        .or_not()
        .ignore_then(term(&fresh))
        .then_ignore(just(Token::End).or_not())
        .then_ignore(end());
    run(src, parser)
}

/// Parse one clause (`head.` or `head :- body.`).
pub fn parse_clause(src: &str) -> Result<Clause, ParseError> {
    let term = parse_term(src)?;
    into_clause(term)
}

/// Parse a sequence of `.`-terminated clauses.
pub fn parse_program(src: &str) -> Result<Vec<Clause>, ParseError> {
    let fresh = Cell::new(0);
    let parser = term(&fresh)
        .then_ignore(just(Token::End))
        .repeated()
        .then_ignore(end());
    run(src, parser)?.into_iter().map(into_clause).collect()
}

/// Split a top-level conjunction `a, (b, c)` into `[a, b, c]`.
pub fn flatten_conjunction(term: &Term) -> Vec<Term> {
    let mut out = Vec::new();
    let mut pending = vec![term];
    while let Some(cursor) = pending.pop() {
        if cursor.is_functor(",", 2) {
            let args = cursor.args();
            pending.push(&args[1]);
            pending.push(&args[0]);
        } else {
            out.push(cursor.clone());
        }
    }
    out
}

fn into_clause(term: Term) -> Result<Clause, ParseError> {
    let (head, body) = if term.is_functor(":-", 2) {
        let args = term.args();
        (args[0].clone(), flatten_conjunction(&args[1]))
    } else {
        (term, Vec::new())
    };
    if head.indicator().is_none() {
        return Err(ParseError::InvalidHead {
            found: head.to_string(),
        });
    }
    Ok(Clause { head, body })
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Token {
    /// Unquoted atom: a lowercase word, a symbol run, `!` or `;`.
    Name(String),
    /// Quoted atom; never treated as an operator.
    Quoted(String),
    /// Atom glued to an opening parenthesis: `foo(`.
    Functor(String),
    Var(String),
    Int(String),
    Float(String),
    /// A quote that runs to the end of input.
    Unterminated,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Bar,
    Comma,
    End,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Name(a) => format!("`{a}`"),
            Token::Quoted(q) => format!("atom '{q}'"),
            Token::Functor(f) => format!("`{f}(`"),
            Token::Var(v) => format!("variable `{v}`"),
            Token::Int(n) | Token::Float(n) => format!("number `{n}`"),
            Token::Unterminated => "unterminated quote".into(),
            Token::End => "end of clause".into(),
            other => format!("`{other}`"),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Name(text) | Token::Var(text) | Token::Int(text) | Token::Float(text) => {
                f.write_str(text)
            }
            Token::Quoted(text) => write!(f, "'{text}'"),
            Token::Functor(text) => write!(f, "{text}("),
            Token::Unterminated => f.write_str("'"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::LBracket => f.write_str("["),
            Token::RBracket => f.write_str("]"),
            Token::Bar => f.write_str("|"),
            Token::Comma => f.write_str(","),
            Token::End => f.write_str("."),
        }
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

fn join((first, rest): (char, Vec<char>)) -> String {
    let mut text = String::from(first);
    text.extend(rest);
    text
}

fn number_literal() -> impl Parser<char, Token, Error = LexError> + Clone {
    let digits = filter(|c: &char| c.is_ascii_digit())
        .repeated()
        .at_least(1)
        .collect::<String>();
    let fraction = just('.').ignore_then(digits.clone()).or_not();
    let exponent = one_of("eE")
        .then(one_of("+-").or_not())
        .then(digits.clone())
        .or_not();

    digits
        .then(fraction)
        .then(exponent)
        .map(|((mut text, fraction), exponent)| {
            let float = fraction.is_some() || exponent.is_some();
            if let Some(fraction) = fraction {
                text.push('.');
                text.push_str(&fraction);
            }
            if let Some(((e, sign), power)) = exponent {
                text.push(e);
                text.extend(sign);
                text.push_str(&power);
            }
            if float {
                Token::Float(text)
            } else {
                Token::Int(text)
            }
        })
        .labelled("number")
}

/// Quoted text; `None` when the closing quote is missing.
fn quoted(quote: char) -> impl Parser<char, Option<String>, Error = LexError> + Clone {
    let escape = just('\\').ignore_then(any()).map(|c: char| match c {
        'n' => '\n',
        't' => '\t',
        other => other,
    });
    let doubled = just(quote).then(just(quote)).to(quote);
    let plain = filter(move |c: &char| *c != quote && *c != '\\');

    just(quote)
        .ignore_then(choice((escape, doubled, plain)).repeated().collect::<String>())
        .then(just(quote).or_not())
        .map(|(text, close)| close.map(|_| text))
}

fn line_comment() -> impl Parser<char, (), Error = LexError> + Clone {
    just('%')
        .then(filter(|c: &char| *c != '\n').repeated())
        .ignored()
}

fn block_comment() -> impl Parser<char, (), Error = LexError> + Clone {
    just("/*")
        .then(take_until(just("*/")))
        .ignored()
}

fn spacing() -> impl Parser<char, (), Error = LexError> + Clone {
    line_comment()
        .or(block_comment())
        .or(text::whitespace().at_least(1).ignored())
        .repeated()
        .ignored()
}

fn lexer() -> impl Parser<char, Vec<(Token, Span)>, Error = LexError> {
    let word_rest = filter(|c: &char| c.is_alphanumeric() || *c == '_').repeated();
    let variable = filter(|c: &char| c.is_uppercase() || *c == '_')
        .then(word_rest.clone())
        .map(join)
        .map(Token::Var);
    let word = filter(|c: &char| c.is_alphabetic() && !c.is_uppercase())
        .then(word_rest)
        .map(join);
    let symbols = filter(|c: &char| is_symbol_char(*c))
        .repeated()
        .at_least(1)
        .collect::<String>();

    // A lone `.` before layout or end of input closes the clause.
    let end_of_clause = just('.')
        .then_ignore(
            filter(|c: &char| c.is_whitespace() || *c == '%')
                .ignored()
                .or(end())
                .rewind(),
        )
        .to(Token::End);

    let callable = choice((
        word.map(|text| (Some(text), false)),
        symbols.map(|text| (Some(text), false)),
        one_of("!;").map(|c: char| (Some(c.to_string()), false)),
        quoted('\'').or(quoted('"')).map(|text| (text, true)),
    ))
    .then(just('(').or_not())
    .map(|((text, is_quoted), open)| match (text, open) {
        (None, _) => Token::Unterminated,
        (Some(text), Some(_)) => Token::Functor(text),
        (Some(text), None) if is_quoted => Token::Quoted(text),
        (Some(text), None) => Token::Name(text),
    });

    let token = choice((
        number_literal(),
        end_of_clause,
        variable,
        callable,
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
        just('[').to(Token::LBracket),
        just(']').to(Token::RBracket),
        just('|').to(Token::Bar),
        just(',').to(Token::Comma),
    ))
    .map_with_span(|token, span| (token, span))
    .then_ignore(spacing());

    spacing().ignore_then(token.repeated()).then_ignore(end())
}

fn lex(src: &str) -> Result<Vec<(Token, Span)>, ParseError> {
    let eoi = src.len()..src.len();
    let chars = src.char_indices().map(|(at, c)| (c, at..at + c.len_utf8()));
    let tokens = lexer()
        .parse(Stream::from_iter(eoi, chars))
        .map_err(|errors| match errors.into_iter().next() {
            Some(error) => lex_error(src, error),
            None => end_of_input(src, "a term"),
        })?;

    for (token, span) in &tokens {
        let invalid = match token {
            Token::Int(text) => text.parse::<i64>().is_err(),
            Token::Float(text) => text.parse::<f64>().is_err(),
            Token::Unterminated => {
                return Err(ParseError::UnterminatedQuote {
                    src: src.to_string(),
                    span: (span.start, 1).into(),
                });
            }
            _ => false,
        };
        if invalid {
            return Err(ParseError::InvalidNumber {
                text: src[span.clone()].to_string(),
                src: src.to_string(),
                span: to_source_span(span),
            });
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn into_term(self) -> Term {
        match self {
            Number::Int(i) => Term::int(i),
            Number::Float(f) => Term::float(f),
        }
    }

    fn negated(self) -> Self {
        match self {
            Number::Int(i) => Number::Int(-i),
            Number::Float(f) => Number::Float(-f),
        }
    }
}

fn name(ops: &'static [&'static str]) -> impl Parser<Token, String, Error = TokenError> + Clone {
    select! { Token::Name(text) if ops.iter().any(|op| *op == text) => text }
}

fn number() -> impl Parser<Token, Number, Error = TokenError> + Clone {
    filter_map(|span: Span, token: Token| match token {
        Token::Int(text) => text
            .parse()
            .map(Number::Int)
            .map_err(|_| Simple::custom(span, "integer out of range")),
        Token::Float(text) => text
            .parse()
            .map(Number::Float)
            .map_err(|_| Simple::custom(span, "malformed float")),
        other => Err(Simple::expected_input_found(span, Vec::new(), Some(other))),
    })
    .labelled("number")
}

/// `-1` with the sign glued to the digits is a literal; `- 1` is `-(1)`.
fn negative_number() -> impl Parser<Token, Term, Error = TokenError> + Clone {
    name(&["-"])
        .map_with_span(|_, span: Span| span)
        .then(number().map_with_span(|value, span: Span| (value, span)))
        .try_map(|(sign, (value, digits)), span| {
            if sign.end == digits.start {
                Ok(value.negated().into_term())
            } else {
                Err(Simple::custom(span, "sign separated from its number"))
            }
        })
}

fn primary<'a>(term: TermParser<'a>, arg: TermParser<'a>, fresh: &'a Cell<usize>) -> TermParser<'a> {
    let variable = select! { Token::Var(name) => name }.map(move |name| {
        if name == "_" {
            fresh.set(fresh.get() + 1);
            Term::var(format!("_G{}", fresh.get()))
        } else {
            Term::var(name)
        }
    });

    let call = select! { Token::Functor(name) => name }
        .then(arg.clone().separated_by(just(Token::Comma)).at_least(1))
        .then_ignore(just(Token::RParen))
        .map(|(name, args)| Term::compound(name, args));

    let nil = just(Token::LBracket)
        .then(just(Token::RBracket))
        .to(Term::atom(LIST_NIL));

    let list = arg
        .clone()
        .separated_by(just(Token::Comma))
        .at_least(1)
        .then(just(Token::Bar).ignore_then(arg).or_not())
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .map(|(items, tail)| Term::list(items, tail));

    let group = term.delimited_by(just(Token::LParen), just(Token::RParen));

    let atom = select! {
        Token::Name(name) => Term::atom(name),
        Token::Quoted(name) => Term::atom(name),
    };

    choice((
        number().map(Number::into_term),
        variable,
        call,
        nil,
        list,
        group,
        atom,
    ))
    .labelled("term")
    .boxed()
}

/// Priority 200, fy: `- X`.
fn minus_level(operand: TermParser<'_>) -> TermParser<'_> {
    recursive(move |this| {
        choice((
            negative_number(),
            name(&["-"])
                .then(this)
                .map(|(op, operand)| Term::compound(op, [operand])),
            operand,
        ))
    })
    .boxed()
}

/// Priority 900, fy: `\+ Goal`.
fn not_level(operand: TermParser<'_>) -> TermParser<'_> {
    recursive(move |this| {
        name(&["\\+"])
            .then(this)
            .map(|(op, operand)| Term::compound(op, [operand]))
            .or(operand)
    })
    .boxed()
}

/// yfx: `a - b - c` reads as `(a - b) - c`.
fn left_assoc<'a>(operand: TermParser<'a>, ops: &'static [&'static str]) -> TermParser<'a> {
    operand
        .clone()
        .then(name(ops).then(operand).repeated())
        .foldl(|left, (op, right)| Term::compound(op, [left, right]))
        .boxed()
}

/// xfx: at most one operator at this level.
fn non_assoc<'a>(operand: TermParser<'a>, ops: &'static [&'static str]) -> TermParser<'a> {
    operand
        .clone()
        .then(name(ops).then(operand).or_not())
        .map(|(left, rest)| match rest {
            Some((op, right)) => Term::compound(op, [left, right]),
            None => left,
        })
        .boxed()
}

/// xfy: `a, b, c` reads as `a, (b, c)`.
fn right_assoc<'a>(
    operand: TermParser<'a>,
    op: impl Parser<Token, String, Error = TokenError> + Clone + 'a,
) -> TermParser<'a> {
    operand
        .clone()
        .then(op.then(operand).repeated())
        .map(|(first, rest)| {
            let mut pending = rest.into_iter().rev();
            let Some((mut op, mut acc)) = pending.next() else {
                return first;
            };
            for (prev_op, operand) in pending {
                acc = Term::compound(op, [operand, acc]);
                op = prev_op;
            }
            Term::compound(op, [first, acc])
        })
        .boxed()
}

/// A full term at priority 1200. Each `_` becomes a fresh `_G<n>` variable.
fn term(fresh: &Cell<usize>) -> TermParser<'_> {
    recursive(move |full| {
        let full = full.boxed();
        let arg = recursive(move |arg| {
            let primary = primary(full, arg.boxed(), fresh);
            let product = left_assoc(minus_level(primary), MULTIPLICATIVE);
            let sum = left_assoc(product, ADDITIVE);
            let comparison = non_assoc(sum, COMPARISON);
            not_level(comparison)
        })
        .boxed();
        let conjunction = right_assoc(arg, just(Token::Comma).to(",".to_string()));
        let disjunction = right_assoc(conjunction, name(&[";"]));
        non_assoc(disjunction, &[":-"])
    })
    .boxed()
}

fn run<T>(src: &str, parser: impl Parser<Token, T, Error = TokenError>) -> Result<T, ParseError> {
    let tokens = lex(src)?;
    let eoi = src.len()..src.len();
    parser
        .parse(Stream::from_iter(eoi, tokens.into_iter()))
        .map_err(|errors| match errors.into_iter().next() {
            Some(error) => syntax_error(src, error),
            None => end_of_input(src, "a term"),
        })
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

fn to_source_span(span: &Span) -> SourceSpan {
    (span.start, span.end.saturating_sub(span.start)).into()
}

fn end_of_input(src: &str, expected: &str) -> ParseError {
    ParseError::Unexpected {
        found: "end of input".into(),
        expected: expected.into(),
        src: src.to_string(),
        span: (src.len(), 0).into(),
    }
}

fn lex_error(src: &str, error: LexError) -> ParseError {
    let found = match error.found() {
        Some(c) => format!("character `{c}`"),
        None => "end of input".into(),
    };
    ParseError::Unexpected {
        found,
        expected: "a term".into(),
        src: src.to_string(),
        span: to_source_span(&error.span()),
    }
}

fn syntax_error(src: &str, error: TokenError) -> ParseError {
    let found = error
        .found()
        .map_or_else(|| "end of input".to_string(), Token::describe);
    let expected = match error.reason() {
        SimpleReason::Custom(message) => message.clone(),
        _ => {
            let mut expected: Vec<String> = error
                .expected()
                .map(|token| {
                    token
                        .as_ref()
                        .map_or_else(|| "end of input".to_string(), Token::describe)
                })
                .collect();
            expected.sort();
            expected.dedup();
            match (error.label(), expected.is_empty()) {
                (Some(label), _) => label.to_string(),
                (None, true) => "a term".into(),
                (None, false) => expected.join(" or "),
            }
        }
    };
    ParseError::Unexpected {
        found,
        expected,
        src: src.to_string(),
        span: to_source_span(&error.span()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_with_variables() {
        let t = parse_term("eats(tom, Food)").unwrap();
        assert_eq!(t, Term::compound("eats", [Term::atom("tom"), Term::var("Food")]));
    }

    #[test]
    fn numbers_and_negative_literals() {
        assert_eq!(parse_term("42").unwrap(), Term::int(42));
        assert_eq!(parse_term("-7").unwrap(), Term::int(-7));
        assert_eq!(parse_term("2.5").unwrap(), Term::float(2.5));
        assert_eq!(parse_term("1.0e3").unwrap(), Term::float(1000.0));
        assert_eq!(parse_term("- 7").unwrap(), Term::compound("-", [Term::int(7)]));
    }

    #[test]
    fn operator_precedence() {
        let t = parse_term("X is 1 + 2 * 3").unwrap();
        let expected = Term::compound(
            "is",
            [
                Term::var("X"),
                Term::compound(
                    "+",
                    [Term::int(1), Term::compound("*", [Term::int(2), Term::int(3)])],
                ),
            ],
        );
        assert_eq!(t, expected);

        // yfx: left associative.
        let t = parse_term("10 - 3 - 2").unwrap();
        assert_eq!(
            t,
            Term::compound(
                "-",
                [Term::compound("-", [Term::int(10), Term::int(3)]), Term::int(2)]
            )
        );

        let t = parse_term("X-1").unwrap();
        assert_eq!(t, Term::compound("-", [Term::var("X"), Term::int(1)]));
    }

    #[test]
    fn unary_minus_on_variables() {
        let t = parse_term("Y is -X").unwrap();
        assert_eq!(t.args()[1], Term::compound("-", [Term::var("X")]));
    }

    #[test]
    fn rule_clause_flattens_body() {
        let c = parse_clause("ancestor(X, Z) :- parent(X, Y), ancestor(Y, Z).").unwrap();
        assert_eq!(c.head.to_string(), "ancestor(X, Z)");
        assert_eq!(c.body.len(), 2);
        assert_eq!(c.body[1].to_string(), "ancestor(Y, Z)");
    }

    #[test]
    fn negation_and_disjunction() {
        let c = parse_clause("ok(X) :- item(X), \\+ broken(X), (a ; b).").unwrap();
        assert!(c.body[1].is_functor("\\+", 1));
        assert!(c.body[2].is_functor(";", 2));
    }

    #[test]
    fn lists_and_quoted_atoms() {
        let t = parse_term("f([a, 'Big Apple' | T], [])").unwrap();
        let list = &t.args()[0];
        assert_eq!(list.to_string(), "[a, 'Big Apple'|T]");
        assert_eq!(t.args()[1], Term::atom("[]"));
        assert_eq!(parse_term("'007'").unwrap(), Term::atom("007"));
        assert_eq!(parse_term("'it''s'").unwrap(), Term::atom("it's"));
    }

    #[test]
    fn operators_as_plain_atoms() {
        let t = parse_term("f(-, !)").unwrap();
        assert_eq!(t, Term::compound("f", [Term::atom("-"), Term::atom("!")]));
    }

    #[test]
    fn anonymous_variables_are_distinct() {
        let t = parse_term("f(_, _)").unwrap();
        assert_ne!(t.args()[0], t.args()[1]);
    }

    #[test]
    fn program_with_comments() {
        let src = "
            % family
            parent(a, b).
            /* a block
               comment */
            parent(b, c).
            ancestor(X, Y) :- parent(X, Y).
        ";
        let clauses = parse_program(src).unwrap();
        assert_eq!(clauses.len(), 3);
        assert!(clauses[0].is_fact());
        assert!(!clauses[2].is_fact());
    }

    #[test]
    fn empty_program() {
        assert!(parse_program("  % nothing here\n").unwrap().is_empty());
    }

    #[test]
    fn query_prefix_and_conjunction() {
        let q = parse_query("?- eats(tom, X), X \\= rice.").unwrap();
        assert!(q.is_functor(",", 2));
    }

    #[test]
    fn display_round_trips() {
        for src in [
            "eats(tom, Food)",
            "X is 1 + 2 * 3",
            "ancestor(X, Z) :- parent(X, Y), ancestor(Y, Z)",
            "f([a, b|T])",
            "g('1.50', 'true')",
        ] {
            let t = parse_term(src).unwrap();
            assert_eq!(parse_term(&t.to_string()).unwrap(), t, "round trip of {src}");
        }
    }

    #[test]
    fn errors_carry_spans() {
        let err = parse_term("eats(tom,").unwrap_err();
        assert!(matches!(err, ParseError::Unexpected { .. }));

        let err = parse_term("'open").unwrap_err();
        assert!(matches!(err, ParseError::UnterminatedQuote { .. }));

        let err = parse_term("99999999999999999999").unwrap_err();
        assert!(matches!(err, ParseError::InvalidNumber { .. }));

        let err = parse_clause("X :- foo.").unwrap_err();
        assert!(matches!(err, ParseError::InvalidHead { .. }));
    }

    #[test]
    fn unexpected_character_points_at_it() {
        let err = parse_term("foo(a) { b }").unwrap_err();
        let ParseError::Unexpected { found, span, .. } = err else {
            panic!("expected an unexpected-token error");
        };
        assert_eq!(found, "character `{`");
        assert_eq!(span.offset(), 7);
    }
}
