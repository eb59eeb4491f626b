//! Boolean structure of recorded predicates.
//!
//! The predicate stream of a query is a flat token list: predicates,
//! `OR`, `NOT` and brackets. Adjacent terms are AND-joined and AND binds
//! tighter than OR:
//!
//! ```text
//! expr  := and (OR and)*
//! and   := unary+
//! unary := NOT unary | '(' expr ')' | predicate
//! ```

use std::collections::BTreeMap;

use super::{Predicate, Token};
use crate::error::{DomainError, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Pred(Predicate),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Every predicate in the expression, left to right.
    pub fn predicates(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        self.collect_predicates(&mut out);
        out
    }

    fn collect_predicates<'a>(&'a self, out: &mut Vec<&'a Predicate>) {
        match self {
            Self::Pred(p) => out.push(p),
            Self::And(items) | Self::Or(items) => {
                for item in items {
                    item.collect_predicates(out);
                }
            }
            Self::Not(inner) => inner.collect_predicates(out),
        }
    }

    pub fn contains_not(&self) -> bool {
        match self {
            Self::Pred(_) => false,
            Self::And(items) | Self::Or(items) => items.iter().any(Expr::contains_not),
            Self::Not(_) => true,
        }
    }
}

fn build_error(message: impl Into<String>) -> DomainError {
    DomainError::QueryBuild(message.into())
}

fn owner_of(pred: &Predicate) -> Result<usize> {
    pred.left
        .match_ref()
        .map(|m| m.index())
        .ok_or_else(|| build_error("a predicate must start from a match, attribute or count"))
}

// ── Parsing ──────────────────────────────────────────────────────

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut terms = vec![self.and()?];
        while matches!(self.peek(), Some(Token::Or)) {
            self.pos += 1;
            terms.push(self.and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn and(&mut self) -> Result<Expr> {
        let mut terms = Vec::new();
        while matches!(
            self.peek(),
            Some(Token::Not | Token::Open | Token::Pred(_))
        ) {
            terms.push(self.unary()?);
        }
        match terms.len() {
            0 => Err(build_error("OR or bracket without a predicate")),
            1 => Ok(terms.remove(0)),
            _ => Ok(Expr::And(terms)),
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| build_error("NOT at the end of the predicates"))?;
        self.pos += 1;
        match token {
            Token::Not => Ok(Expr::Not(Box::new(self.unary()?))),
            Token::Open => {
                let inner = self.expr()?;
                match self.peek() {
                    Some(Token::Close) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(build_error("unbalanced brackets: missing BR_CLOSE")),
                }
            }
            Token::Pred(p) => Ok(Expr::Pred(p)),
            Token::Or | Token::Close => Err(build_error("unexpected OR or BR_CLOSE")),
        }
    }
}

/// Parse a token stream into one expression; `None` for an empty stream.
pub(crate) fn parse(tokens: &[Token]) -> Result<Option<Expr>> {
    if tokens.is_empty() {
        return Ok(None);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if parser.pos < tokens.len() {
        return Err(build_error("unbalanced brackets: unexpected BR_CLOSE"));
    }
    Ok(Some(expr))
}

// ── Partitioning ─────────────────────────────────────────────────

/// Split the top-level stream into one expression per owning match.
///
/// A term is one predicate or one bracket group, with any leading NOTs.
/// Terms joined by OR must share an owner, as must all predicates of one
/// bracket group. Each OR chain is bracketed when the per-owner streams are
/// assembled, so a chain never absorbs the terms around it.
pub(crate) fn partition(tokens: &[Token]) -> Result<BTreeMap<usize, Expr>> {
    let mut chains: Vec<(usize, Vec<Token>)> = Vec::new();
    let mut pos = 0;
    let mut joined = false;
    while pos < tokens.len() {
        if matches!(tokens[pos], Token::Or) {
            if joined || chains.is_empty() {
                return Err(build_error("OR without a preceding predicate"));
            }
            joined = true;
            pos += 1;
            continue;
        }

        let (owner, end) = term(tokens, pos)?;
        let term_tokens = &tokens[pos..end];
        match chains.last_mut() {
            Some((chain_owner, chain)) if joined => {
                if *chain_owner != owner {
                    return Err(build_error(
                        "OR joins predicates on different matches",
                    ));
                }
                chain.push(Token::Or);
                chain.extend_from_slice(term_tokens);
            }
            _ => chains.push((owner, term_tokens.to_vec())),
        }
        joined = false;
        pos = end;
    }
    if joined {
        return Err(build_error("OR at the end of the predicates"));
    }

    let mut streams: BTreeMap<usize, Vec<Token>> = BTreeMap::new();
    for (owner, chain) in chains {
        let stream = streams.entry(owner).or_default();
        stream.push(Token::Open);
        stream.extend(chain);
        stream.push(Token::Close);
    }
    let mut exprs = BTreeMap::new();
    for (owner, stream) in streams {
        if let Some(expr) = parse(&stream)? {
            exprs.insert(owner, expr);
        }
    }
    Ok(exprs)
}

/// Owner and end position of the term starting at `start`.
fn term(tokens: &[Token], start: usize) -> Result<(usize, usize)> {
    let mut pos = start;
    while matches!(tokens.get(pos), Some(Token::Not)) {
        pos += 1;
    }
    match tokens.get(pos) {
        Some(Token::Pred(p)) => Ok((owner_of(p)?, pos + 1)),
        Some(Token::Open) => {
            let mut depth = 0usize;
            let mut owner = None;
            for (i, token) in tokens.iter().enumerate().skip(pos) {
                match token {
                    Token::Open => depth += 1,
                    Token::Close => {
                        depth -= 1;
                        if depth == 0 {
                            let owner =
                                owner.ok_or_else(|| build_error("empty bracket group"))?;
                            return Ok((owner, i + 1));
                        }
                    }
                    Token::Pred(p) => {
                        let o = owner_of(p)?;
                        match owner {
                            Some(existing) if existing != o => {
                                return Err(build_error(
                                    "a bracket group mixes predicates on different matches",
                                ))
                            }
                            _ => owner = Some(o),
                        }
                    }
                    Token::Or | Token::Not => {}
                }
            }
            Err(build_error("unbalanced brackets: missing BR_CLOSE"))
        }
        Some(Token::Close) => Err(build_error("unbalanced brackets: unexpected BR_CLOSE")),
        _ => Err(build_error("NOT without a following predicate")),
    }
}
