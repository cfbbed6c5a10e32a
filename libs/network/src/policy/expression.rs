//! Policy Expression Compiler
//!
//! Grammar:
//!
//! ```text
//! policy    := gate | principal
//! gate      := ("AND" | "OR") "(" policy ("," policy)* ")"
//!            | "OutOf" "(" number "," policy ("," policy)* ")"
//! principal := quoted "MSPID.role"   (single or double quotes)
//! ```
//!
//! Operators are case-insensitive. `AND` requires every sub-policy, `OR`
//! any one of them. Repeated principals share one identity slot.

use super::{MspPrincipal, MspRole, PolicyCompiler, PolicyError, PolicyRule, SignaturePolicyEnvelope, POLICY_VERSION};

/// Built-in compiler for the signature policy grammar
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionCompiler;

impl PolicyCompiler for ExpressionCompiler {
    fn compile(&self, expression: &str) -> Result<SignaturePolicyEnvelope, PolicyError> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Err(PolicyError::Empty);
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            end: expression.len(),
            identities: Vec::new(),
        };
        let rule = parser.policy()?;

        if let Some(token) = parser.tokens.get(parser.pos) {
            return Err(PolicyError::Syntax {
                offset: token.offset,
                message: "unexpected trailing input".to_string(),
            });
        }

        Ok(SignaturePolicyEnvelope {
            version: POLICY_VERSION,
            rule,
            identities: parser.identities,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Open,
    Close,
    Comma,
    Quoted(String),
    Word(String),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>, PolicyError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | ',' => {
                chars.next();
                let kind = match c {
                    '(' => TokenKind::Open,
                    ')' => TokenKind::Close,
                    _ => TokenKind::Comma,
                };
                tokens.push(Token { kind, offset });
            }
            '\'' | '"' => {
                chars.next();
                let mut value = String::new();
                let mut terminated = false;
                for (_, next) in chars.by_ref() {
                    if next == c {
                        terminated = true;
                        break;
                    }
                    value.push(next);
                }
                if !terminated {
                    return Err(PolicyError::Syntax {
                        offset,
                        message: "unterminated quoted principal".to_string(),
                    });
                }
                tokens.push(Token {
                    kind: TokenKind::Quoted(value),
                    offset,
                });
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut value = String::new();
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        value.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Word(value),
                    offset,
                });
            }
            other => {
                return Err(PolicyError::Syntax {
                    offset,
                    message: format!("unexpected character '{}'", other),
                })
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
    identities: Vec<MspPrincipal>,
}

impl Parser {
    fn policy(&mut self) -> Result<PolicyRule, PolicyError> {
        let token = self.next("a policy")?;

        match token.kind {
            TokenKind::Quoted(principal) => self.principal(&principal, token.offset),
            TokenKind::Word(word) => {
                let gate = word.to_ascii_lowercase();
                self.expect(TokenKind::Open, "'('")?;
                match gate.as_str() {
                    "and" => {
                        let rules = self.sub_policies()?;
                        Ok(PolicyRule::NOutOf {
                            n: rules.len(),
                            rules,
                        })
                    }
                    "or" => {
                        let rules = self.sub_policies()?;
                        Ok(PolicyRule::NOutOf { n: 1, rules })
                    }
                    "outof" => {
                        let n = self.threshold()?;
                        self.expect(TokenKind::Comma, "','")?;
                        let rules = self.sub_policies()?;
                        if n == 0 || n > rules.len() {
                            return Err(PolicyError::InvalidThreshold {
                                n,
                                count: rules.len(),
                            });
                        }
                        Ok(PolicyRule::NOutOf { n, rules })
                    }
                    _ => Err(PolicyError::Syntax {
                        offset: token.offset,
                        message: format!("unknown operator '{}'", word),
                    }),
                }
            }
            _ => Err(PolicyError::Syntax {
                offset: token.offset,
                message: "expected an operator or a quoted principal".to_string(),
            }),
        }
    }

    /// Comma separated policies up to and including the closing parenthesis
    fn sub_policies(&mut self) -> Result<Vec<PolicyRule>, PolicyError> {
        let mut rules = vec![self.policy()?];
        loop {
            let token = self.next("',' or ')'")?;
            match token.kind {
                TokenKind::Comma => rules.push(self.policy()?),
                TokenKind::Close => return Ok(rules),
                _ => {
                    return Err(PolicyError::Syntax {
                        offset: token.offset,
                        message: "expected ',' or ')'".to_string(),
                    })
                }
            }
        }
    }

    fn threshold(&mut self) -> Result<usize, PolicyError> {
        let token = self.next("a threshold")?;
        match &token.kind {
            TokenKind::Word(word) => word.parse().map_err(|_| PolicyError::Syntax {
                offset: token.offset,
                message: format!("invalid threshold '{}'", word),
            }),
            _ => Err(PolicyError::Syntax {
                offset: token.offset,
                message: "expected a threshold".to_string(),
            }),
        }
    }

    fn principal(&mut self, value: &str, offset: usize) -> Result<PolicyRule, PolicyError> {
        let (msp_id, role) = value.rsplit_once('.').ok_or_else(|| PolicyError::Syntax {
            offset,
            message: format!("principal '{}' is not of the form 'MSPID.role'", value),
        })?;
        if msp_id.is_empty() {
            return Err(PolicyError::Syntax {
                offset,
                message: format!("principal '{}' has an empty MSP id", value),
            });
        }

        let principal = MspPrincipal::new(msp_id, role.parse::<MspRole>()?);
        let index = match self.identities.iter().position(|p| *p == principal) {
            Some(index) => index,
            None => {
                self.identities.push(principal);
                self.identities.len() - 1
            }
        };

        Ok(PolicyRule::SignedBy(index))
    }

    fn next(&mut self, expected: &str) -> Result<Token, PolicyError> {
        let token = self.tokens.get(self.pos).cloned().ok_or_else(|| PolicyError::Syntax {
            offset: self.end,
            message: format!("expected {} but input ended", expected),
        })?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<(), PolicyError> {
        let token = self.next(expected)?;
        if token.kind == kind {
            Ok(())
        } else {
            Err(PolicyError::Syntax {
                offset: token.offset,
                message: format!("expected {}", expected),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(expression: &str) -> Result<SignaturePolicyEnvelope, PolicyError> {
        ExpressionCompiler.compile(expression)
    }

    #[test]
    fn test_out_of() {
        let policy = compile("OutOf(2, 'OrgA.member', 'OrgB.member', 'OrgC.admin')").unwrap();

        assert_eq!(
            policy.rule,
            PolicyRule::NOutOf {
                n: 2,
                rules: vec![
                    PolicyRule::SignedBy(0),
                    PolicyRule::SignedBy(1),
                    PolicyRule::SignedBy(2)
                ],
            }
        );
        assert_eq!(policy.identities[2], MspPrincipal::new("OrgC", MspRole::Admin));
        assert!(policy.is_satisfied_by(&[
            MspPrincipal::member("OrgA"),
            MspPrincipal::new("OrgC", MspRole::Admin)
        ]));
        assert!(!policy.is_satisfied_by(&[MspPrincipal::member("OrgA")]));
    }

    #[test]
    fn test_nested_gates_share_principals() {
        let policy =
            compile(r#"and('OrgA.member', OR("OrgB.peer", 'OrgA.member'))"#).unwrap();

        assert_eq!(policy.identities.len(), 2);
        assert_eq!(
            policy.rule,
            PolicyRule::NOutOf {
                n: 2,
                rules: vec![
                    PolicyRule::SignedBy(0),
                    PolicyRule::NOutOf {
                        n: 1,
                        rules: vec![PolicyRule::SignedBy(1), PolicyRule::SignedBy(0)],
                    },
                ],
            }
        );
    }

    #[test]
    fn test_msp_id_may_contain_dots() {
        let policy = compile("'org.example.com.client'").unwrap();
        assert_eq!(
            policy.identities,
            vec![MspPrincipal::new("org.example.com", MspRole::Client)]
        );
        assert_eq!(policy.rule, PolicyRule::SignedBy(0));
    }

    #[test]
    fn test_rejections() {
        assert_eq!(compile("  "), Err(PolicyError::Empty));
        assert_eq!(
            compile("'OrgA.owner'"),
            Err(PolicyError::UnknownRole("owner".to_string()))
        );
        assert_eq!(
            compile("OutOf(3, 'OrgA.member', 'OrgB.member')"),
            Err(PolicyError::InvalidThreshold { n: 3, count: 2 })
        );
        assert!(matches!(compile("XOR('OrgA.member')"), Err(PolicyError::Syntax { .. })));
        assert!(matches!(compile("AND('OrgA.member'"), Err(PolicyError::Syntax { .. })));
        assert!(matches!(compile("'OrgA.member"), Err(PolicyError::Syntax { .. })));
        assert!(matches!(compile("'OrgA.member' 'OrgB.member'"), Err(PolicyError::Syntax { .. })));
        assert!(matches!(compile("'member'"), Err(PolicyError::Syntax { .. })));
    }
}
