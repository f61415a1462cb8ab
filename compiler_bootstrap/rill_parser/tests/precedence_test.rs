//! Parametrized checks that the Pratt parser's binding powers
//! (`rill_parser::precedence`) produce the expected associativity and
//! precedence shape for every binary operator, rather than exercising one
//! operator at a time by hand.

use rill_common::StringTable;
use rill_parser::{BinOp, ExprKind, ItemKind, Parser, StmtKind};
use test_case::test_case;

fn parse_return_expr(src: &str) -> ExprKind {
    let body = format!("export func f() {{ return {src}; }}");
    let mut strings = StringTable::new();
    let program = Parser::parse_source(&body, 0, &mut strings).expect("parse error");
    let ItemKind::Function(f) = &program.items[0].kind else { panic!("expected function") };
    let StmtKind::Expr(ret) = &f.body.stmts[0].kind else { panic!("expected return statement") };
    let ExprKind::Return(Some(inner)) = &ret.kind else { panic!("expected non-empty return") };
    inner.kind.clone()
}

fn top_level_op(kind: &ExprKind) -> BinOp {
    match kind {
        ExprKind::Binary { op, .. } => *op,
        other => panic!("expected a binary expression, got {other:?}"),
    }
}

#[test_case("1 * 2 + 3", BinOp::Add; "multiplication binds tighter than addition")]
#[test_case("1 + 2 * 3", BinOp::Add; "addition is the outer op when multiplication trails")]
#[test_case("1 < 2 == true", BinOp::Eq; "equality binds looser than comparison")]
#[test_case("1 + 2 < 3 + 4", BinOp::Lt; "comparison binds looser than addition on both sides")]
#[test_case("2 ^ 3 ^ 2", BinOp::Pow; "exponentiation is right-associative so the outer op is still Pow")]
fn outer_operator_matches_precedence_table(src: &str, expected: BinOp) {
    assert_eq!(top_level_op(&parse_return_expr(src)), expected);
}

#[test_case("1 - 2 - 3"; "subtraction is left-associative")]
#[test_case("8 / 4 / 2"; "division is left-associative")]
fn left_associative_ops_nest_lhs(src: &str) {
    let ExprKind::Binary { lhs, .. } = parse_return_expr(src) else { panic!("expected binary") };
    assert!(matches!(lhs.kind, ExprKind::Binary { .. }), "lhs of a left-associative chain should itself be a binary expr");
}
