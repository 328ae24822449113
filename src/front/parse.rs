//! The parser.
//!
//! A hand-written recursive-descent parser over the eagerly scanned token
//! stream.  The first syntax error aborts with a located error.

use crate::common::{intern, CompileError, Id, Location, Result};
use crate::front::ast::{BinaryOp, Node, NodeKind, UnaryOp};
use crate::front::lex::{Lexer, Token, TokenKind};
use crate::front::literal::{LiteralValue, LiteralValueKind};
use crate::front::types::TypeKeyword;

/// Parse a translation unit.
pub fn parse(input: &str, filename: &str) -> Result<Node> {
    let tokens = Lexer::new(input, filename).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        file: intern(filename),
    };
    parser.parse_unit()
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
    file: Id,
}

const TYPE_KEYWORDS: &[(TokenKind, TypeKeyword)] = &[
    (TokenKind::Void, TypeKeyword::Void),
    (TokenKind::Char, TypeKeyword::Char),
    (TokenKind::Int, TypeKeyword::Int),
    (TokenKind::Long, TypeKeyword::Long),
    (TokenKind::Short, TypeKeyword::Short),
    (TokenKind::Signed, TypeKeyword::Signed),
    (TokenKind::Unsigned, TypeKeyword::Unsigned),
    (TokenKind::Const, TypeKeyword::Const),
    (TokenKind::Volatile, TypeKeyword::Volatile),
];

impl<'src> Parser<'src> {
    fn kind_at(&self, offset: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| t.kind)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.kind_at(0)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn loc(&self) -> Location {
        match self.tokens.get(self.pos) {
            Some(tok) => tok.loc,
            None => self
                .tokens
                .last()
                .map(|t| t.loc)
                .unwrap_or_else(|| Location::new(self.file, 1, 1)),
        }
    }

    fn error(&self, msg: impl Into<String>) -> CompileError {
        CompileError::semantic(self.loc(), msg.into())
    }

    fn advance(&mut self) -> Result<Token<'src>> {
        let tok = self
            .tokens
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(tok)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.error(format!(
                "expected '{kind}'{}",
                match self.tokens.get(self.pos) {
                    Some(tok) => format!(", found '{}'", tok.text),
                    None => ", found end of input".to_owned(),
                }
            )))
        }
    }

    fn starts_type(&self, kind: TokenKind) -> bool {
        kind == TokenKind::Struct
            || kind == TokenKind::Union
            || TYPE_KEYWORDS.iter().any(|&(k, _)| k == kind)
    }

    fn parse_unit(&mut self) -> Result<Node> {
        let loc = self.loc();
        let mut items = Vec::new();
        while self.peek_kind().is_some() {
            items.push(self.parse_top_level()?);
        }
        Ok(Node::new(NodeKind::Unit(items), loc))
    }

    fn parse_top_level(&mut self) -> Result<Node> {
        // struct <tag> { ... };
        if self.check(TokenKind::Struct)
            && self.kind_at(1) == Some(TokenKind::Ident)
            && self.kind_at(2) == Some(TokenKind::LBrace)
        {
            return self.parse_struct_def();
        }

        let loc = self.loc();
        let base = self.parse_type_base()?;

        // Look ahead past any pointer stars: an identifier followed by an
        // opening parenthesis is a function.
        let mut stars = 0;
        while self.kind_at(stars) == Some(TokenKind::Asterisk) {
            stars += 1;
        }
        if self.kind_at(stars) == Some(TokenKind::Ident)
            && self.kind_at(stars + 1) == Some(TokenKind::LParen)
        {
            return self.parse_function(base, loc);
        }

        self.parse_var_decl_tail(base, loc)
    }

    fn parse_struct_def(&mut self) -> Result<Node> {
        let loc = self.loc();
        self.expect(TokenKind::Struct)?;
        let tag = intern(self.expect(TokenKind::Ident)?.text);
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) {
            let floc = self.loc();
            let base = self.parse_type_base()?;
            let field = self.parse_var_decl_tail(base, floc)?;
            fields.push(field);
        }
        self.expect(TokenKind::RBrace)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Node::new(NodeKind::StructDef { tag, fields }, loc))
    }

    /// Parse a declaration specifier: either a keyword multiset or a
    /// struct/union type reference.
    fn parse_type_base(&mut self) -> Result<Node> {
        let loc = self.loc();
        if self.eat(TokenKind::Struct) {
            let tag = intern(self.expect(TokenKind::Ident)?.text);
            return Ok(Node::new(NodeKind::StructTypeRef(tag), loc));
        }
        if self.eat(TokenKind::Union) {
            let tag = intern(self.expect(TokenKind::Ident)?.text);
            return Ok(Node::new(NodeKind::UnionTypeRef(tag), loc));
        }
        let mut keywords = Vec::new();
        while let Some(kind) = self.peek_kind() {
            match TYPE_KEYWORDS.iter().find(|&&(k, _)| k == kind) {
                Some(&(_, kw)) => {
                    keywords.push(kw);
                    self.pos += 1;
                }
                None => break,
            }
        }
        if keywords.is_empty() {
            return Err(self.error("expected a type"));
        }
        Ok(Node::new(NodeKind::BasicType(keywords), loc))
    }

    fn parse_function(&mut self, base: Node, loc: Location) -> Result<Node> {
        let mut ret = base;
        while self.eat(TokenKind::Asterisk) {
            ret = Node::new(NodeKind::PointerType(Box::new(ret)), loc);
        }
        let name = intern(self.expect(TokenKind::Ident)?.text);
        let params = self.parse_params()?;
        if self.eat(TokenKind::Semicolon) {
            return Ok(Node::new(
                NodeKind::FunctionDecl {
                    ret: Box::new(ret),
                    name,
                    params,
                },
                loc,
            ));
        }
        let body = self.parse_statement_list()?;
        Ok(Node::new(
            NodeKind::FunctionDef {
                ret: Box::new(ret),
                name,
                params,
                body: Box::new(body),
            },
            loc,
        ))
    }

    fn parse_params(&mut self) -> Result<Vec<Node>> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if self.eat(TokenKind::RParen) {
            return Ok(params);
        }
        // (void) is an explicitly empty parameter list
        if self.check(TokenKind::Void) && self.kind_at(1) == Some(TokenKind::RParen) {
            self.pos += 2;
            return Ok(params);
        }
        loop {
            let loc = self.loc();
            let base = self.parse_type_base()?;
            let decl = self.parse_declarator()?;
            params.push(Node::new(
                NodeKind::Parameter {
                    base: Box::new(base),
                    decl: Box::new(decl),
                },
                loc,
            ));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    /// Declarators: leading stars, a name, then array suffixes.
    fn parse_declarator(&mut self) -> Result<Node> {
        let loc = self.loc();
        let mut stars = 0;
        while self.eat(TokenKind::Asterisk) {
            stars += 1;
        }
        let name = intern(self.expect(TokenKind::Ident)?.text);
        let mut decl = Node::new(NodeKind::NamedDeclarator(name), loc);
        while self.eat(TokenKind::LBracket) {
            let size_tok = self.expect(TokenKind::IntLit)?;
            let size = match LiteralValue::from_int_literal(size_tok.text, size_tok.loc)? {
                LiteralValue::Integer { value, .. } => value as u64,
                _ => unreachable!(),
            };
            self.expect(TokenKind::RBracket)?;
            decl = Node::new(
                NodeKind::ArrayDeclarator {
                    decl: Box::new(decl),
                    size,
                },
                loc,
            );
        }
        for _ in 0..stars {
            decl = Node::new(NodeKind::PointerDeclarator(Box::new(decl)), loc);
        }
        Ok(decl)
    }

    fn parse_init_declarator(&mut self) -> Result<Node> {
        let loc = self.loc();
        let decl = self.parse_declarator()?;
        if self.eat(TokenKind::Assign) {
            let init = self.parse_assignment()?;
            return Ok(Node::new(
                NodeKind::InitDeclarator {
                    decl: Box::new(decl),
                    init: Box::new(init),
                },
                loc,
            ));
        }
        Ok(decl)
    }

    /// The declarator list and semicolon of a variable declaration whose
    /// base type has already been parsed.
    fn parse_var_decl_tail(&mut self, base: Node, loc: Location) -> Result<Node> {
        let mut declarators = vec![self.parse_init_declarator()?];
        while self.eat(TokenKind::Comma) {
            declarators.push(self.parse_init_declarator()?);
        }
        self.expect(TokenKind::Semicolon)?;
        Ok(Node::new(
            NodeKind::VarDecl {
                base: Box::new(base),
                declarators,
            },
            loc,
        ))
    }

    fn parse_statement_list(&mut self) -> Result<Node> {
        let loc = self.loc();
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) {
            stmts.push(self.parse_statement()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Node::new(NodeKind::StatementList(stmts), loc))
    }

    fn parse_statement(&mut self) -> Result<Node> {
        let loc = self.loc();
        match self.peek_kind() {
            None => Err(self.error("unexpected end of input")),
            Some(TokenKind::LBrace) => self.parse_statement_list(),
            Some(TokenKind::Semicolon) => {
                self.pos += 1;
                Ok(Node::new(NodeKind::EmptyStatement, loc))
            }
            Some(TokenKind::If) => {
                self.pos += 1;
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                let then = self.parse_statement()?;
                if self.eat(TokenKind::Else) {
                    let els = self.parse_statement()?;
                    Ok(Node::new(
                        NodeKind::IfElse {
                            cond: Box::new(cond),
                            then: Box::new(then),
                            els: Box::new(els),
                        },
                        loc,
                    ))
                } else {
                    Ok(Node::new(
                        NodeKind::If {
                            cond: Box::new(cond),
                            then: Box::new(then),
                        },
                        loc,
                    ))
                }
            }
            Some(TokenKind::While) => {
                self.pos += 1;
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                let body = self.parse_statement()?;
                Ok(Node::new(
                    NodeKind::While {
                        cond: Box::new(cond),
                        body: Box::new(body),
                    },
                    loc,
                ))
            }
            Some(TokenKind::Do) => {
                self.pos += 1;
                let body = self.parse_statement()?;
                self.expect(TokenKind::While)?;
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Node::new(
                    NodeKind::DoWhile {
                        body: Box::new(body),
                        cond: Box::new(cond),
                    },
                    loc,
                ))
            }
            Some(TokenKind::For) => {
                self.pos += 1;
                self.expect(TokenKind::LParen)?;
                let init = if self.check(TokenKind::Semicolon) {
                    None
                } else {
                    Some(Box::new(self.parse_expr()?))
                };
                self.expect(TokenKind::Semicolon)?;
                let cond = if self.check(TokenKind::Semicolon) {
                    None
                } else {
                    Some(Box::new(self.parse_expr()?))
                };
                self.expect(TokenKind::Semicolon)?;
                let update = if self.check(TokenKind::RParen) {
                    None
                } else {
                    Some(Box::new(self.parse_expr()?))
                };
                self.expect(TokenKind::RParen)?;
                let body = self.parse_statement()?;
                Ok(Node::new(
                    NodeKind::For {
                        init,
                        cond,
                        update,
                        body: Box::new(body),
                    },
                    loc,
                ))
            }
            Some(TokenKind::Return) => {
                self.pos += 1;
                if self.eat(TokenKind::Semicolon) {
                    return Ok(Node::new(NodeKind::Return, loc));
                }
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Node::new(NodeKind::ReturnExpr(Box::new(expr)), loc))
            }
            Some(kind) if self.starts_type(kind) => {
                let base = self.parse_type_base()?;
                self.parse_var_decl_tail(base, loc)
            }
            Some(_) => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Node::new(NodeKind::ExpressionStatement(Box::new(expr)), loc))
            }
        }
    }

    fn parse_expr(&mut self) -> Result<Node> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Node> {
        let lhs = self.parse_logical_or()?;
        if self.eat(TokenKind::Assign) {
            let loc = lhs.loc;
            let rhs = self.parse_assignment()?;
            return Ok(Node::new(
                NodeKind::Binary {
                    op: BinaryOp::Assign,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                loc,
            ));
        }
        Ok(lhs)
    }

    fn binary_fold(
        &mut self,
        next: fn(&mut Self) -> Result<Node>,
        table: &[(TokenKind, BinaryOp)],
    ) -> Result<Node> {
        let mut lhs = next(self)?;
        'outer: loop {
            for &(kind, op) in table {
                if self.eat(kind) {
                    let rhs = next(self)?;
                    let loc = lhs.loc;
                    lhs = Node::new(
                        NodeKind::Binary {
                            op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                        loc,
                    );
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn parse_logical_or(&mut self) -> Result<Node> {
        self.binary_fold(
            Self::parse_logical_and,
            &[(TokenKind::LogicalOr, BinaryOp::LogOr)],
        )
    }

    fn parse_logical_and(&mut self) -> Result<Node> {
        self.binary_fold(
            Self::parse_equality,
            &[(TokenKind::LogicalAnd, BinaryOp::LogAnd)],
        )
    }

    fn parse_equality(&mut self) -> Result<Node> {
        self.binary_fold(
            Self::parse_relational,
            &[
                (TokenKind::Equality, BinaryOp::Eq),
                (TokenKind::Inequality, BinaryOp::Neq),
            ],
        )
    }

    fn parse_relational(&mut self) -> Result<Node> {
        self.binary_fold(
            Self::parse_additive,
            &[
                (TokenKind::Lte, BinaryOp::Lte),
                (TokenKind::Gte, BinaryOp::Gte),
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Gt, BinaryOp::Gt),
            ],
        )
    }

    fn parse_additive(&mut self) -> Result<Node> {
        self.binary_fold(
            Self::parse_multiplicative,
            &[
                (TokenKind::Plus, BinaryOp::Plus),
                (TokenKind::Minus, BinaryOp::Minus),
            ],
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Node> {
        self.binary_fold(
            Self::parse_unary,
            &[
                (TokenKind::Asterisk, BinaryOp::Mul),
                (TokenKind::Divide, BinaryOp::Div),
                (TokenKind::Mod, BinaryOp::Mod),
            ],
        )
    }

    fn parse_unary(&mut self) -> Result<Node> {
        let loc = self.loc();
        let op = match self.peek_kind() {
            Some(TokenKind::Minus) => Some(UnaryOp::Neg),
            Some(TokenKind::Not) => Some(UnaryOp::Not),
            Some(TokenKind::Asterisk) => Some(UnaryOp::Deref),
            Some(TokenKind::Ampersand) => Some(UnaryOp::AddrOf),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(Node::new(
                NodeKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                loc,
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Node> {
        let mut node = self.parse_primary()?;
        loop {
            let loc = node.loc;
            if self.eat(TokenKind::LParen) {
                let mut args = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        args.push(self.parse_assignment()?);
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RParen)?;
                node = Node::new(
                    NodeKind::Call {
                        callee: Box::new(node),
                        args,
                    },
                    loc,
                );
            } else if self.eat(TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(TokenKind::RBracket)?;
                node = Node::new(
                    NodeKind::ArrayElementRef {
                        base: Box::new(node),
                        index: Box::new(index),
                    },
                    loc,
                );
            } else if self.eat(TokenKind::Dot) {
                let field = intern(self.expect(TokenKind::Ident)?.text);
                node = Node::new(
                    NodeKind::FieldRef {
                        base: Box::new(node),
                        field,
                    },
                    loc,
                );
            } else if self.eat(TokenKind::Arrow) {
                let field = intern(self.expect(TokenKind::Ident)?.text);
                node = Node::new(
                    NodeKind::IndirectFieldRef {
                        base: Box::new(node),
                        field,
                    },
                    loc,
                );
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Node> {
        let loc = self.loc();
        match self.peek_kind() {
            Some(TokenKind::Ident) => {
                let name = intern(self.advance()?.text);
                Ok(Node::new(NodeKind::VarRef(name), loc))
            }
            Some(TokenKind::IntLit) => {
                let text = self.advance()?.text.to_owned();
                Ok(Node::new(
                    NodeKind::Literal {
                        kind: LiteralValueKind::Integer,
                        text,
                    },
                    loc,
                ))
            }
            Some(TokenKind::CharLit) => {
                let text = self.advance()?.text.to_owned();
                Ok(Node::new(
                    NodeKind::Literal {
                        kind: LiteralValueKind::Character,
                        text,
                    },
                    loc,
                ))
            }
            Some(TokenKind::StrLit) => {
                let text = self.advance()?.text.to_owned();
                Ok(Node::new(
                    NodeKind::Literal {
                        kind: LiteralValueKind::String,
                        text,
                    },
                    loc,
                ))
            }
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            Some(_) => Err(self.error(format!(
                "unexpected token '{}'",
                self.tokens[self.pos].text
            ))),
            None => Err(self.error("unexpected end of input")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Node {
        parse(src, "test.c").expect("parse should succeed")
    }

    #[test]
    fn parses_minimal_function() {
        let unit = parse_ok("int main(void) { return 42; }");
        match &unit.kind {
            NodeKind::Unit(items) => match &items[0].kind {
                NodeKind::FunctionDef { name, params, .. } => {
                    assert_eq!(name.as_ref(), "main");
                    assert!(params.is_empty());
                }
                other => panic!("expected function def, got {other:?}"),
            },
            _ => panic!("expected unit"),
        }
    }

    #[test]
    fn parses_declaration_with_initializers() {
        let unit = parse_ok("int main(void) { int a = 1, b = 2, c; c = a + b; return c; }");
        assert!(unit.tree_string().contains("init_declarator"));
    }

    #[test]
    fn parses_struct_definition() {
        let unit = parse_ok("struct P { int x; int y; }; int main(void) { struct P p; p.y = 3; return p.y; }");
        let tree = unit.tree_string();
        assert!(tree.contains("struct_def[P]"));
        assert!(tree.contains("field_ref[y]"));
    }

    #[test]
    fn declarator_shapes() {
        let unit = parse_ok("int *a[4];");
        let tree = unit.tree_string();
        // pointer declarator wrapping the array declarator
        let ptr_at = tree.find("pointer_declarator").unwrap();
        let arr_at = tree.find("array_declarator[4]").unwrap();
        assert!(ptr_at < arr_at);
    }

    #[test]
    fn precedence_is_standard() {
        let unit = parse_ok("int main(void) { return 1 + 2 * 3 < 4 == 5; }");
        let tree = unit.tree_string();
        let eq = tree.find("binary_expression[==]").unwrap();
        let lt = tree.find("binary_expression[<]").unwrap();
        let plus = tree.find("binary_expression[+]").unwrap();
        let mul = tree.find("binary_expression[*]").unwrap();
        assert!(eq < lt && lt < plus && plus < mul);
    }

    #[test]
    fn postfix_chains() {
        let unit = parse_ok("int main(void) { return f(a)[1].x->y; }");
        let tree = unit.tree_string();
        assert!(tree.contains("function_call"));
        assert!(tree.contains("array_element_ref"));
        assert!(tree.contains("field_ref[x]"));
        assert!(tree.contains("indirect_field_ref[y]"));
    }

    #[test]
    fn function_declaration_and_pointers() {
        let unit = parse_ok("int *f(int x); char g(void) { return 'a'; }");
        let tree = unit.tree_string();
        assert!(tree.contains("function_decl[f]"));
        assert!(tree.contains("pointer_type"));
        assert!(tree.contains("function_def[g]"));
    }

    #[test]
    fn control_flow_statements() {
        let src = "int main(void) { int i; for (i = 0; i < 10; i = i + 1) { } \
                   while (i) i = i - 1; do i = 1; while (0); if (i) return 1; else return 0; }";
        let tree = parse_ok(src).tree_string();
        assert!(tree.contains("for"));
        assert!(tree.contains("while"));
        assert!(tree.contains("do_while"));
        assert!(tree.contains("if_else"));
    }

    #[test]
    fn rejects_missing_semicolon() {
        assert!(parse("int main(void) { return 1 }", "test.c").is_err());
    }
}
