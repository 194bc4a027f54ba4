//! Token stream canonicalisation.
//!
//! The parser wants exactly one shape per construct. This stage inserts the
//! defaults the source is allowed to omit: attribute lists on definition
//! heads, the `local` register set on bare accesses, `void` on a bare
//! `return`, and the `infinity` timeout on a bare `receive`. It also
//! validates timeout literal shape, which is cheaper to do while the stream
//! is still flat.

use crate::{
    error::CompileError,
    lexer::Token,
};

const REGISTER_SETS: &[&str] = &[
    "local",
    "static",
    "global",
    "arguments",
    "parameters",
    "closure_local",
];

fn is_register_access(token: &Token) -> bool {
    token.text.starts_with(['%', '@', '*'])
}

fn is_timeout(text: &str) -> bool {
    if text == "infinity" {
        return true;
    }
    let digits = text
        .strip_suffix("ms")
        .or_else(|| text.strip_suffix('s'));
    match digits {
        Some(digits) if !digits.is_empty() => {
            digits.chars().all(|c| c.is_ascii_digit())
                && (digits == "0" || !digits.starts_with('0'))
        }
        _ => false,
    }
}

fn synthetic(after: &Token, text: &str) -> Token {
    Token {
        location: after.location,
        text: text.into(),
    }
}

fn normalise_head(
    line: &[Token],
    output: &mut Vec<Token>,
) -> Result<(), CompileError> {
    // .function: [[ attrs ]] name
    output.push(line[0].clone());
    let mut rest = &line[1..];
    if rest.first().map(|t| t.is("[[")).unwrap_or(false) {
        let close = rest
            .iter()
            .position(|t| t.is("]]"))
            .ok_or_else(|| {
                CompileError::syntax(
                    line[0].location,
                    "unterminated attribute list",
                )
            })?;
        output.extend(rest[..=close].iter().cloned());
        rest = &rest[close + 1..];
    } else {
        output.push(synthetic(&line[0], "[["));
        output.push(synthetic(&line[0], "]]"));
    }
    match rest {
        [name] => {
            output.push(name.clone());
            Ok(())
        }
        [] => Err(CompileError::syntax(
            line[0].location,
            format!("{} expects a name", line[0].text),
        )),
        [_, extra, ..] => Err(CompileError::syntax(
            extra.location,
            "unexpected token after definition name",
        )),
    }
}

fn normalise_instruction(
    line: &[Token],
    output: &mut Vec<Token>,
) -> Result<(), CompileError> {
    let mnemonic = &line[0];
    output.push(mnemonic.clone());

    let default_set = if mnemonic.is("frame") {
        "arguments"
    } else {
        "local"
    };

    let mut i = 1;
    while i < line.len() {
        let token = &line[i];
        output.push(token.clone());
        if is_register_access(token) {
            match line.get(i + 1) {
                Some(next) if REGISTER_SETS.contains(&next.text.as_str()) => {
                    output.push(next.clone());
                    i += 2;
                    continue;
                }
                _ => {
                    output.push(synthetic(token, default_set));
                }
            }
        }
        i += 1;
    }

    // Defaults for omissible trailing operands.
    if mnemonic.is("return") && line.len() == 1 {
        output.push(synthetic(mnemonic, "void"));
    }
    if mnemonic.is("receive") {
        let last = output.last().expect("line is non-empty");
        if is_register_access(last) || REGISTER_SETS.contains(&last.text.as_str())
        {
            output.push(synthetic(mnemonic, "infinity"));
        }
        let timeout = output.last().expect("just pushed");
        if !is_timeout(&timeout.text) {
            return Err(CompileError::syntax(
                timeout.location,
                format!("invalid timeout operand: {}", timeout.text),
            ));
        }
    }

    Ok(())
}

/// Canonicalise a lexed token stream.
pub fn normalise(tokens: Vec<Token>) -> Result<Vec<Token>, CompileError> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut line = Vec::new();

    for token in tokens {
        if !token.is_newline() {
            line.push(token);
            continue;
        }

        if let Some(first) = line.first() {
            if matches!(
                first.text.as_str(),
                ".function:" | ".closure:" | ".block:"
            ) {
                normalise_head(&line, &mut output)?;
            } else if first.text.starts_with('.') {
                output.extend(line.iter().cloned());
            } else {
                normalise_instruction(&line, &mut output)?;
            }
        }

        output.push(token);
        line.clear();
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn normalised(source: &str) -> Vec<String> {
        normalise(lex(source).unwrap())
            .unwrap()
            .into_iter()
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn bare_register_accesses_get_the_local_set() {
        assert_eq!(
            normalised("izero %0\n"),
            vec!["izero", "%0", "local", "\n"]
        );
    }

    #[test]
    fn frame_defaults_to_the_arguments_set() {
        assert_eq!(
            normalised("frame %2\n"),
            vec!["frame", "%2", "arguments", "\n"]
        );
    }

    #[test]
    fn bare_return_returns_void() {
        assert_eq!(normalised("return\n"), vec!["return", "void", "\n"]);
        assert_eq!(
            normalised("return %1 local\n"),
            vec!["return", "%1", "local", "\n"]
        );
    }

    #[test]
    fn heads_get_an_empty_attribute_list() {
        assert_eq!(
            normalised(".function: main/0\n"),
            vec![".function:", "[[", "]]", "main/0", "\n"]
        );
        assert_eq!(
            normalised(".function: [[entry]] main/0\n"),
            vec![".function:", "[[", "entry", "]]", "main/0", "\n"]
        );
    }

    #[test]
    fn receive_defaults_to_infinity() {
        assert_eq!(
            normalised("receive %1\n"),
            vec!["receive", "%1", "local", "infinity", "\n"]
        );
    }

    #[test]
    fn timeouts_are_validated() {
        assert!(normalise(lex("receive %1 local 5quid\n").unwrap()).is_err());
        assert!(normalise(lex("receive %1 local 1s\n").unwrap()).is_ok());
        assert!(normalise(lex("receive %1 local 100ms\n").unwrap()).is_ok());
    }
}
