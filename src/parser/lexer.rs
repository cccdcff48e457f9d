use chumsky::prelude::*;

use crate::ast::source::Literal;

#[derive(Clone, PartialEq, Debug)]
pub enum Token {
    Ident(String),
    Literal(Literal),

    // this contains 3 bytes at most, we should replace it with SmallStr
    Control(String),
}

pub fn lexer() -> impl Parser<char, Vec<(Token, std::ops::Range<usize>)>, Error = Simple<char>> {
    // `===`/`!==` canonicalize to their loose forms; the visitor treats them
    // identically anyway.
    let control_multi = choice((
        just("===").to("=="),
        just("!==").to("!="),
        just("=>"),
        just("=="),
        just("!="),
        just(">="),
        just("<="),
        just("&&"),
        just("||"),
        just("??"),
        just("?."),
        just("..."),
    ))
    .map(|x: &str| x.to_string())
    .map(Token::Control);

    let control = one_of("></%=+-*(){}[].,:?!")
        .map(|c: char| c.to_string())
        .map(Token::Control);

    // Reserved words lex as literals, everything else as an identifier.
    let ident = ident_part().map(|s| match s.as_str() {
        "true" => Token::Literal(Literal::Boolean(true)),
        "false" => Token::Literal(Literal::Boolean(false)),
        "null" => Token::Literal(Literal::Null),
        "undefined" => Token::Literal(Literal::Undefined),
        _ => Token::Ident(s),
    });

    let literal = literal().map(Token::Literal);

    let comment = just("//")
        .then(filter(|c: &char| *c != '\n').repeated())
        .ignored();
    let whitespace = filter(|c: &char| c.is_whitespace()).ignored();
    let trivia = whitespace.or(comment).repeated();

    choice((control_multi, literal, ident, control))
        .map_with_span(|tok, span| (tok, span))
        .padded_by(trivia)
        .repeated()
        .then_ignore(end())
}

fn ident_part() -> impl Parser<char, String, Error = Simple<char>> + Clone {
    filter(|c: &char| c.is_ascii_alphabetic() || *c == '_' || *c == '$')
        .map(Some)
        .chain::<char, Vec<_>, _>(
            filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_' || *c == '$').repeated(),
        )
        .collect()
}

fn literal() -> impl Parser<char, Literal, Error = Simple<char>> {
    let number_part = filter(|c: &char| c.is_ascii_digit()).repeated().at_least(1);

    let frac = just('.').chain(number_part.clone());

    let exp = just('e').or(just('E')).chain::<char, _, _>(
        just('+')
            .or(just('-'))
            .or_not()
            .chain::<char, _, _>(number_part.clone()),
    );

    let number = number_part
        .chain::<char, _, _>(frac.or_not().flatten())
        .chain::<char, _, _>(exp.or_not().flatten())
        .collect::<String>()
        .try_map(|str, span| {
            if let Ok(i) = str.parse::<i64>() {
                Ok(Literal::Integer(i))
            } else if let Ok(f) = str.parse::<f64>() {
                Ok(Literal::Float(f))
            } else {
                Err(Simple::custom(span, "invalid number"))
            }
        })
        .labelled("number");

    string().or(number)
}

fn string() -> impl Parser<char, Literal, Error = Simple<char>> {
    let escape = just('\\').ignore_then(
        just('\\')
            .or(just('/'))
            .or(just('"'))
            .or(just('\''))
            .or(just('b').to('\x08'))
            .or(just('f').to('\x0C'))
            .or(just('n').to('\n'))
            .or(just('r').to('\r'))
            .or(just('t').to('\t')),
    );

    (just('\'')
        .ignore_then(
            filter(|c| *c != '\\' && *c != '\'')
                .or(escape.clone())
                .repeated(),
        )
        .then_ignore(just('\'')))
    .or(just('"')
        .ignore_then(filter(|c| *c != '\\' && *c != '"').or(escape).repeated())
        .then_ignore(just('"')))
    .collect::<String>()
    .map(Literal::String)
    .labelled("string")
}

impl std::hash::Hash for Token {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
    }
}

impl std::cmp::Eq for Token {}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ident(arg0) => write!(f, "`{arg0}`"),
            Self::Literal(arg0) => write!(f, "{arg0}"),
            Self::Control(arg0) => write!(f, "{arg0}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        lexer()
            .parse(source)
            .unwrap()
            .into_iter()
            .map(|(tok, _)| tok)
            .collect()
    }

    #[test]
    fn test_lex_chain() {
        assert_eq!(
            lex("u => u.age >= 18"),
            vec![
                Token::Ident("u".to_string()),
                Token::Control("=>".to_string()),
                Token::Ident("u".to_string()),
                Token::Control(".".to_string()),
                Token::Ident("age".to_string()),
                Token::Control(">=".to_string()),
                Token::Literal(Literal::Integer(18)),
            ]
        );
    }

    #[test]
    fn test_lex_strict_equality_canonicalizes() {
        assert_eq!(
            lex("a === null"),
            vec![
                Token::Ident("a".to_string()),
                Token::Control("==".to_string()),
                Token::Literal(Literal::Null),
            ]
        );
    }

    #[test]
    fn test_lex_literals() {
        assert_eq!(
            lex(r#"'it\'s' "x" 1.5 10 true undefined"#),
            vec![
                Token::Literal(Literal::String("it's".to_string())),
                Token::Literal(Literal::String("x".to_string())),
                Token::Literal(Literal::Float(1.5)),
                Token::Literal(Literal::Integer(10)),
                Token::Literal(Literal::Boolean(true)),
                Token::Literal(Literal::Undefined),
            ]
        );
    }

    #[test]
    fn test_lex_comments_and_spread() {
        assert_eq!(
            lex("...u // trailing\n"),
            vec![
                Token::Control("...".to_string()),
                Token::Ident("u".to_string()),
            ]
        );
    }
}
