//! Semantic analysis for Rill: symbol tables, scope trees, and expression
//! typing over the `rill_parser` AST (spec §3, §4.1).

pub mod resolver;
pub mod types;

pub use resolver::{analyze, SemanticTables};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use rill_common::StringTable;
    use rill_parser::{ExprKind, ItemKind, Parser, StmtKind};

    fn analyze_src(src: &str) -> (SemanticTables, StringTable, rill_parser::Program) {
        let mut strings = StringTable::new();
        let program = Parser::parse_source(src, 0, &mut strings).expect("parse error");
        let tables = analyze(&program);
        (tables, strings, program)
    }

    #[test]
    fn resolves_parameter_and_local_references() {
        let (tables, _strings, program) =
            analyze_src("export func f(n) { var s = n; return s; }");
        assert!(tables.diagnostics.is_empty());
        let ItemKind::Function(f) = &program.items[0].kind else { panic!() };
        // `s`'s init expr `n` resolves to the parameter symbol.
        let StmtKind::Decl { init, .. } = &f.body.stmts[0].kind else { panic!() };
        let ExprKind::Ident(_) = &init.kind else { panic!() };
        let sym = tables.node_symbol[&init.id];
        assert_eq!(tables.symbols[sym as usize].kind, SymbolKind::Parameter);
    }

    #[test]
    fn marks_closure_captured_variable() {
        let (tables, _strings, program) = analyze_src(
            "export func h() { const c = { var x = 0; func() { x = x + 1; return x; }; }; return c() + c(); }",
        );
        let ItemKind::Function(h) = &program.items[0].kind else { panic!() };
        let StmtKind::Decl { init: block_expr, .. } = &h.body.stmts[0].kind else { panic!() };
        let ExprKind::Block(inner) = &block_expr.kind else { panic!() };
        let StmtKind::Decl { binding: x_binding, .. } = &inner.stmts[0].kind else { panic!() };
        let x_sym = tables.node_symbol[&x_binding.id];
        assert!(tables.symbols[x_sym as usize].captured);
    }

    #[test]
    fn unresolved_identifier_becomes_global_symbol() {
        let (tables, _strings, program) = analyze_src("export func f() { return UNBOUND; }");
        let ItemKind::Function(f) = &program.items[0].kind else { panic!() };
        let StmtKind::Expr(ret) = &f.body.stmts[0].kind else { panic!() };
        let ExprKind::Return(Some(inner)) = &ret.kind else { panic!() };
        let sym = tables.node_symbol[&inner.id];
        assert_eq!(tables.symbols[sym as usize].kind, SymbolKind::Global);
    }

    #[test]
    fn if_without_else_has_no_expression_type() {
        let (tables, _strings, program) =
            analyze_src("export func f(n) { if (n) { return 1; }; return 0; }");
        let ItemKind::Function(f) = &program.items[0].kind else { panic!() };
        let StmtKind::Expr(if_expr) = &f.body.stmts[0].kind else { panic!() };
        assert_eq!(tables.node_type[&if_expr.id], ExprType::None);
    }

    #[test]
    fn if_else_both_returning_is_never() {
        let (tables, _strings, program) = analyze_src(
            "export func f(n) { if (n) { return 1; } else { return 0; }; return 9; }",
        );
        let ItemKind::Function(f) = &program.items[0].kind else { panic!() };
        let StmtKind::Expr(if_expr) = &f.body.stmts[0].kind else { panic!() };
        assert_eq!(tables.node_type[&if_expr.id], ExprType::Never);
    }

    #[test]
    fn duplicate_declaration_in_same_scope_is_an_error() {
        let (tables, ..) = analyze_src("export func f() { var x = 1; var x = 2; return x; }");
        assert!(tables.diagnostics.has_errors());
    }
}
