//! Syntax analysis for Rill: AST definitions and a recursive-descent
//! parser over `rill_lexer` tokens.
//!
//! Per spec §1 the front end is an external collaborator; this crate
//! exists to make the rest of the pipeline runnable end-to-end.

pub mod ast;
pub mod parser;
pub mod precedence;

pub use ast::*;
pub use parser::Parser;

#[cfg(test)]
mod tests {
    use super::*;
    use rill_common::StringTable;

    fn parse(src: &str) -> (Program, StringTable) {
        let mut strings = StringTable::new();
        let program = Parser::parse_source(src, 0, &mut strings).expect("parse error");
        (program, strings)
    }

    #[test]
    fn parses_simple_function() {
        let (program, _) = parse("export func f() { return 1 + 2; }");
        assert_eq!(program.items.len(), 1);
        let ItemKind::Function(f) = &program.items[0].kind else { panic!() };
        assert!(f.exported);
        assert_eq!(f.body.stmts.len(), 1);
    }

    #[test]
    fn parses_for_loop_accumulator() {
        let (program, _) = parse(
            "export func g(n) { var s = 0; for (var i = 0; i < n; i = i + 1) { s = s + i; }; return s; }",
        );
        assert_eq!(program.items.len(), 1);
    }

    #[test]
    fn parses_closure_returning_block() {
        let (program, _) = parse(
            "export func h() { const c = { var x = 0; func() { x = x + 1; return x; }; }; return c() + c() + c(); }",
        );
        assert_eq!(program.items.len(), 1);
    }

    #[test]
    fn folds_adjacent_string_literals_at_parse_time() {
        let (program, _) = parse(r#"export func p() { return "Hello " + "World"; }"#);
        let ItemKind::Function(f) = &program.items[0].kind else { panic!() };
        let StmtKind::Expr(ret) = &f.body.stmts[0].kind else { panic!() };
        let ExprKind::Return(Some(inner)) = &ret.kind else { panic!() };
        let ExprKind::Binary { lhs, rhs, .. } = &inner.kind else { panic!() };
        let ExprKind::Str(pieces) = &lhs.kind else { panic!("expected string literal lhs") };
        assert_eq!(pieces.len(), 1);
        let ExprKind::Str(pieces2) = &rhs.kind else { panic!() };
        assert_eq!(pieces2.len(), 1);
    }

    #[test]
    fn parses_index_expression() {
        let (program, _) = parse("export func r() { return [1,2,3][5]; }");
        assert_eq!(program.items.len(), 1);
    }

    #[test]
    fn parses_records_sets_and_maps() {
        let (program, _) = parse(
            "export func m() { var r = { x: 1, y: 2 }; var s = #{1, 2, 3}; var d = #{1: \"a\"}; return r.x; }",
        );
        assert_eq!(program.items.len(), 1);
    }
}
