//! End-to-end over the lexer/parser string machinery plus formatted
//! conversion: the embedded-expression scenario and the format word.

use ox_core::lexer::{FL_DIV, Lexer, TokenKind};
use ox_core::parser::ast::{BinaryOp, Expr, Lit, Stmt, StrPart};
use ox_core::parser::parse_str;
use ox_core::runtime::format::{SOUT_FL_ZERO, SoutFormat, sout_make};
use ox_core::runtime::operation::{to_string, to_string_format};
use ox_core::{ContextId, Value, Vm};

fn setup() -> (Vm, ContextId) {
    ox_core::logger::init_logger();
    let mut vm = Vm::new();
    let ctx = vm.acquire_context();
    (vm, ctx)
}

/// Constant-folds the small expression shapes the scenario produces, the
/// way the external compiler would evaluate them.
fn eval_const(e: &Expr) -> Value {
    match e {
        Expr::Lit(Lit::Number(n)) => Value::Number(*n),
        Expr::Lit(Lit::Bool(b)) => Value::Bool(*b),
        Expr::Lit(Lit::Null) => Value::Null,
        Expr::Binary(BinaryOp::Add, l, r) => {
            match (eval_const(l), eval_const(r)) {
                (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
                _ => Value::Null,
            }
        }
        _ => Value::Null,
    }
}

#[test]
fn embedded_expression_scenario_end_to_end() {
    let (mut vm, ctx) = setup();

    // Token level: head, expression tokens, tail.
    let mut lx = Lexer::new(ox_core::input::StringInput::source(
        "t",
        "\"hello {1+2} world\"",
    ));
    let head = lx.token(0);
    assert!(matches!(&head.kind, TokenKind::StrHead(s) if s == "hello "));
    assert!(matches!(lx.token(FL_DIV).kind, TokenKind::Number(n) if n == 1.0));
    let _plus = lx.token(FL_DIV);
    assert!(matches!(lx.token(FL_DIV).kind, TokenKind::Number(n) if n == 2.0));
    assert!(matches!(lx.token(FL_DIV).kind, TokenKind::StrTail(s) if s == " world"));

    // AST level, then evaluate the template the way the engine would.
    let r = parse_str("t", "s = \"hello {1+2} world\"\n");
    assert!(r.ok);
    let Stmt::Expr { expr, .. } = &r.ast.top_level().body.stmts[0] else {
        panic!("expected expression statement");
    };
    let Expr::Assign { value, .. } = expr else {
        panic!("expected assignment");
    };
    let Expr::StrTemplate(parts) = &**value else {
        panic!("expected template");
    };

    let mut out = String::new();
    for part in parts {
        match part {
            StrPart::Str(s) => out.push_str(s),
            StrPart::Expr { expr, format } => {
                let v = eval_const(expr);
                let s = match format {
                    Some(word) => to_string_format(&mut vm, ctx, v, *word).unwrap(),
                    None => to_string(&mut vm, ctx, v).unwrap(),
                };
                out.push_str(vm.str_value(s).unwrap());
            }
        }
    }

    assert_eq!(out, "hello 3 world");
}

#[test]
fn format_word_padding_and_kinds() {
    let (mut vm, ctx) = setup();

    let word = sout_make(0, 5, 0xff, SoutFormat::Dec);
    let s = to_string_format(&mut vm, ctx, Value::Number(42.0), word).unwrap();
    assert_eq!(vm.str_value(s), Some("   42"));

    let word = sout_make(SOUT_FL_ZERO, 5, 0xff, SoutFormat::Dec);
    let s = to_string_format(&mut vm, ctx, Value::Number(-42.0), word).unwrap();
    assert_eq!(vm.str_value(s), Some("-0042"));

    let word = sout_make(0, 0xff, 0xff, SoutFormat::Hex);
    let s = to_string_format(&mut vm, ctx, Value::Number(255.0), word).unwrap();
    assert_eq!(vm.str_value(s), Some("ff"));

    let word = sout_make(0, 0xff, 0xff, SoutFormat::Oct);
    let s = to_string_format(&mut vm, ctx, Value::Number(8.0), word).unwrap();
    assert_eq!(vm.str_value(s), Some("10"));

    let word = sout_make(0, 0xff, 2, SoutFormat::Float);
    let s = to_string_format(&mut vm, ctx, Value::Number(3.14159), word).unwrap();
    assert_eq!(vm.str_value(s), Some("3.14"));

    let word = sout_make(0, 0xff, 0xff, SoutFormat::Char);
    let s = to_string_format(&mut vm, ctx, Value::Number(65.0), word).unwrap();
    assert_eq!(vm.str_value(s), Some("A"));
}

#[test]
fn left_aligned_string_padding() {
    let (mut vm, ctx) = setup();

    let word = sout_make(
        ox_core::runtime::format::SOUT_FL_ALIGN_HEAD,
        6,
        0xff,
        SoutFormat::Str,
    );
    let v = vm.new_string("ab");
    let s = to_string_format(&mut vm, ctx, v, word).unwrap();
    assert_eq!(vm.str_value(s), Some("ab    "));
}

#[test]
fn number_rendering_defaults() {
    let (mut vm, ctx) = setup();

    for (n, want) in [
        (3.0, "3"),
        (3.5, "3.5"),
        (-2.0, "-2"),
        (0.25, "0.25"),
        (f64::NAN, "nan"),
        (f64::INFINITY, "inf"),
    ] {
        let s = to_string(&mut vm, ctx, Value::Number(n)).unwrap();
        assert_eq!(vm.str_value(s), Some(want), "for {n}");
    }
}

#[test]
fn triple_string_parses_to_plain_string() {
    let r = parse_str("t", "s = ''\nline one\n''\n");
    assert!(r.ok);
    let Stmt::Expr { expr, .. } = &r.ast.top_level().body.stmts[0] else {
        panic!()
    };
    let Expr::Assign { value, .. } = expr else { panic!() };
    assert!(matches!(&**value, Expr::Str(s) if s == "line one"));
}
