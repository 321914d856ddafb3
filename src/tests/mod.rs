//! End-to-end scenarios: source in, request out, against an inert build
//! client and in-memory module directories.

use crate::compile::{compile, CompileError};
use crate::language::parser::parse_module;
use crate::runtime::codegen::{CodeGen, NoClient, Target};
use crate::runtime::context::{CancelToken, Context};
use crate::runtime::error::EvalErrorKind;
use crate::runtime::resolver::{MemDirectory, NoResolver};
use crate::runtime::solver::Request;
use crate::runtime::value::{FsOp, OptFragment};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn build_with_dir(
    source: &str,
    targets: &[&str],
    dir: MemDirectory,
) -> Result<Request, CompileError> {
    let targets: Vec<Target> = targets.iter().map(|t| Target::new(*t)).collect();
    compile(
        &Context::background(),
        Arc::new(NoClient),
        Arc::new(NoResolver),
        Arc::new(dir),
        "main.hlb",
        source,
        &targets,
    )
}

fn build(source: &str, targets: &[&str]) -> Result<Request, CompileError> {
    build_with_dir(source, targets, MemDirectory::new("root"))
}

/// Unwrap a `Parallel` of solves into per-target op lists.
fn solved_ops(request: &Request) -> Vec<Vec<FsOp>> {
    let Request::Parallel { requests } = request else {
        panic!("expected parallel request, got {request:?}");
    };
    requests
        .iter()
        .map(|r| match r {
            Request::Solve { definition } => definition.ops(),
            other => panic!("expected solve request, got {other:?}"),
        })
        .collect()
}

fn eval_error(result: Result<Request, CompileError>) -> EvalErrorKind {
    match result {
        Err(CompileError::Eval(err)) => err.kind,
        other => panic!("expected eval error, got {other:?}"),
    }
}

#[test]
fn scratch_target_solves_to_parallel_request() {
    let request = build("fs default() {\n\tscratch\n}\n", &["default"]).unwrap();
    assert_eq!(solved_ops(&request), vec![vec![FsOp::Scratch]]);
}

#[test]
fn run_receives_incoming_image_and_option_list() {
    let request = build(
        "fs a() {\n\timage \"alpine\"\n\trun \"echo hi\" with option { env \"K\" \"V\"; }\n}\n",
        &["a"],
    )
    .unwrap();
    let ops = &solved_ops(&request)[0];
    assert_eq!(
        ops[0],
        FsOp::Image {
            reference: "alpine".into(),
            options: vec![],
        }
    );
    assert_eq!(
        ops[1],
        FsOp::Run {
            command: vec!["echo hi".into()],
            options: vec![OptFragment::RunEnv {
                key: "K".into(),
                value: "V".into(),
            }],
        }
    );
}

#[test]
fn heredoc_dedent_strips_common_indent() {
    let request = build(
        "fs f() {\n\tscratch\n\tmkfile \"/m\" 0o644 <<-END\n\thello\n\tworld\nEND\n}\n",
        &["f"],
    )
    .unwrap();
    let ops = &solved_ops(&request)[0];
    let FsOp::Mkfile { content, mode, .. } = &ops[1] else {
        panic!("expected mkfile, got {:?}", ops[1]);
    };
    assert_eq!(content, "hello\nworld");
    assert_eq!(*mode, 0o644);
}

#[test]
fn heredoc_fold_joins_lines() {
    let request = build(
        "fs f() {\n\tscratch\n\tmkfile \"/m\" 0o644 <<~END\n\ta\n\tb\n\tc\nEND\n}\n",
        &["f"],
    )
    .unwrap();
    let ops = &solved_ops(&request)[0];
    let FsOp::Mkfile { content, .. } = &ops[1] else {
        panic!("expected mkfile");
    };
    assert_eq!(content, "a b c");
}

#[test]
fn raw_heredoc_skips_interpolation() {
    let request = build(
        "fs f() {\n\tscratch\n\tmkfile \"/m\" 0o644 <<`END`\n$x literal\nEND\n}\n",
        &["f"],
    )
    .unwrap();
    let ops = &solved_ops(&request)[0];
    let FsOp::Mkfile { content, .. } = &ops[1] else {
        panic!("expected mkfile");
    };
    assert_eq!(content, "$x literal");
}

#[test]
fn interpolation_calls_string_functions() {
    let request = build(
        "string x() {\n\t\"world\"\n}\nfs f() {\n\tscratch\n\tmkfile \"/m\" 0o644 \"hello $x\"\n}\n",
        &["f"],
    )
    .unwrap();
    let ops = &solved_ops(&request)[0];
    let FsOp::Mkfile { content, .. } = &ops[1] else {
        panic!("expected mkfile");
    };
    assert_eq!(content, "hello world");
}

#[test]
fn escaped_dollar_is_literal() {
    let request = build(
        "fs f() {\n\tscratch\n\tmkfile \"/m\" 0o644 \"price \\$5\"\n}\n",
        &["f"],
    )
    .unwrap();
    let ops = &solved_ops(&request)[0];
    let FsOp::Mkfile { content, .. } = &ops[1] else {
        panic!("expected mkfile");
    };
    assert_eq!(content, "price $5");
}

#[test]
fn braced_interpolation_evaluates_call_exprs() {
    let request = build(
        "fs f() {\n\tscratch\n\tmkfile \"/m\" 0o644 \"${format(\"%s-%s\", \"a\", \"b\")}\"\n}\n",
        &["f"],
    )
    .unwrap();
    let ops = &solved_ops(&request)[0];
    let FsOp::Mkfile { content, .. } = &ops[1] else {
        panic!("expected mkfile");
    };
    assert_eq!(content, "a-b");
}

#[test]
fn import_dispatches_into_checked_module() {
    let dir = MemDirectory::new("root").insert(
        "util.hlb",
        "export base\nfs base() {\n\timage \"alpine\"\n}\n",
    );
    let request = build_with_dir(
        "import util \"./util.hlb\"\nfs a() {\n\tutil.base\n\trun \"make\"\n}\n",
        &["a"],
        dir,
    )
    .unwrap();
    let ops = &solved_ops(&request)[0];
    assert_eq!(
        ops[0],
        FsOp::Image {
            reference: "alpine".into(),
            options: vec![],
        }
    );
    assert!(matches!(ops[1], FsOp::Run { .. }));
}

#[test]
fn missing_import_path_is_reported_on_the_expression() {
    let source = "import util \"./missing.hlb\"\nfs a() {\n\tutil.base\n}\n";
    let err = match build(source, &["a"]) {
        Err(CompileError::Eval(err)) => err,
        other => panic!("expected eval error, got {other:?}"),
    };
    assert_eq!(
        err.kind,
        EvalErrorKind::ImportPathNotExist {
            filename: "./missing.hlb".into()
        }
    );
    let point = err.point.expect("error position");
    let offset = source.find("\"./missing.hlb\"").unwrap();
    assert_eq!(point.span.start, offset);
}

#[test]
fn unexported_member_is_rejected() {
    let dir = MemDirectory::new("root").insert("util.hlb", "fs base() {\n\tscratch\n}\n");
    let err = eval_error(build_with_dir(
        "import util \"./util.hlb\"\nfs a() {\n\tutil.base\n}\n",
        &["a"],
        dir,
    ));
    assert!(matches!(err, EvalErrorKind::ImportCheck { .. }));
}

#[test]
fn import_cycle_is_detected() {
    let dir = MemDirectory::new("root")
        .insert(
            "b.hlb",
            "import a \"./a.hlb\"\nexport f\nfs f() {\n\ta.g\n}\n",
        )
        .insert(
            "a.hlb",
            "import b \"./b.hlb\"\nexport g\nfs g() {\n\tb.f\n}\n",
        );
    let err = eval_error(build_with_dir(
        "import b \"./b.hlb\"\nfs top() {\n\tb.f\n}\n",
        &["top"],
        dir,
    ));
    assert!(matches!(err, EvalErrorKind::ImportCycle { .. }));
}

#[test]
fn bind_sub_closure_feeds_options_to_run() {
    let request = build(
        "fs a() {\n\timage \"x\"\n\trun \"make\" as built { mount fs { scratch; } \"/in\"; }\n}\n",
        &["a"],
    )
    .unwrap();
    let ops = &solved_ops(&request)[0];
    let FsOp::Run { command, options } = &ops[1] else {
        panic!("expected run, got {:?}", ops[1]);
    };
    assert_eq!(command, &vec!["make".to_string()]);
    let OptFragment::Mount { input, target, .. } = &options[0] else {
        panic!("expected mount option, got {:?}", options[0]);
    };
    assert_eq!(input.ops(), vec![FsOp::Scratch]);
    assert_eq!(target, "/in");
}

#[test]
fn bind_target_captures_the_bound_calls_value() {
    let request = build(
        "fs b() {\n\timage \"x\"\n\trun \"make\" as snapshot\n\tdockerPush \"registry/app\"\n}\n",
        &["snapshot"],
    )
    .unwrap();
    let ops = &solved_ops(&request)[0];
    // The binding observes the chain right after the bound run, before the
    // push that follows it.
    assert_eq!(ops.len(), 2);
    assert!(matches!(
        ops[0],
        FsOp::Image { .. }
    ));
    assert!(matches!(ops[1], FsOp::Run { .. }));
}

#[test]
fn block_statements_thread_one_register_in_order() {
    let request = build(
        "fs o() {\n\tscratch\n\tenv \"A\" \"1\"\n\tdir \"/d\"\n}\n",
        &["o"],
    )
    .unwrap();
    let ops = &solved_ops(&request)[0];
    assert_eq!(
        ops,
        &vec![
            FsOp::Scratch,
            FsOp::Env {
                key: "A".into(),
                value: "1".into(),
            },
            FsOp::Dir { path: "/d".into() },
        ]
    );

    let swapped = build(
        "fs o() {\n\tscratch\n\tdir \"/d\"\n\tenv \"A\" \"1\"\n}\n",
        &["o"],
    )
    .unwrap();
    assert_ne!(request, swapped);
}

#[test]
fn option_parameters_append_in_source_order() {
    let source = concat!(
        "option::run base() {\n\tdir \"/d\"\n}\n",
        "option::run combined(option::run o) {\n\tenv \"K\" \"V\"\n\to\n}\n",
        "fs a() {\n\timage \"i\"\n\trun \"c\" with combined(base)\n}\n",
    );
    let request = build(source, &["a"]).unwrap();
    let ops = &solved_ops(&request)[0];
    let FsOp::Run { options, .. } = &ops[1] else {
        panic!("expected run");
    };
    assert_eq!(
        options,
        &vec![
            OptFragment::RunEnv {
                key: "K".into(),
                value: "V".into(),
            },
            OptFragment::RunDir { path: "/d".into() },
        ]
    );
}

#[test]
fn function_parameters_bind_arguments() {
    let request = build(
        "fs base(string tag) {\n\timage tag\n}\nfs app() {\n\tbase \"alpine:3.19\"\n}\n",
        &["app"],
    )
    .unwrap();
    let ops = &solved_ops(&request)[0];
    assert_eq!(
        ops[0],
        FsOp::Image {
            reference: "alpine:3.19".into(),
            options: vec![],
        }
    );
}

#[test]
fn pipeline_targets_sequence_their_stages() {
    let request = build(
        "pipeline p() {\n\tstage fs { scratch; }\n\tstage fs { image \"a\"; } fs { image \"b\"; }\n}\n",
        &["p"],
    )
    .unwrap();
    let Request::Parallel { requests } = &request else {
        panic!("expected parallel");
    };
    let Request::Sequence { requests: stages } = &requests[0] else {
        panic!("expected sequence, got {:?}", requests[0]);
    };
    assert_eq!(stages.len(), 2);
    let Request::Parallel { requests: second } = &stages[1] else {
        panic!("expected parallel stage");
    };
    assert_eq!(second.len(), 2);
}

#[test]
fn multiple_targets_return_parallel_requests() {
    let request = build(
        "fs a() {\n\tscratch\n}\nfs b() {\n\timage \"x\"\n}\n",
        &["a", "b"],
    )
    .unwrap();
    assert_eq!(solved_ops(&request).len(), 2);
}

#[test]
fn missing_target_is_a_user_error() {
    let err = eval_error(build("fs a() {\n\tscratch\n}\n", &["nope"]));
    assert_eq!(
        err,
        EvalErrorKind::UndefinedTarget {
            name: "nope".into(),
            filename: "main.hlb".into(),
        }
    );
}

#[test]
fn cancellation_propagates_through_generate() {
    let token = CancelToken::new();
    token.cancel();
    let ctx = Context::with_cancel(token);
    let result = compile(
        &ctx,
        Arc::new(NoClient),
        Arc::new(NoResolver),
        Arc::new(MemDirectory::new("root")),
        "main.hlb",
        "fs a() {\n\tscratch\n}\n",
        &[Target::new("a")],
    );
    assert_eq!(eval_error(result), EvalErrorKind::Cancelled);
}

#[test]
fn unchecked_modules_resolve_nothing() {
    // Scope contents come from the checker alone; skipping it leaves even
    // declared targets unresolvable.
    let module = parse_module("main.hlb", "fs a() {\n\tscratch\n}\n").unwrap();
    let cg = CodeGen::new(Arc::new(NoClient), Arc::new(NoResolver)).unwrap();
    let err = cg
        .generate(&Context::background(), &module, &[Target::new("a")])
        .unwrap_err();
    assert_eq!(
        err.kind,
        EvalErrorKind::UndefinedTarget {
            name: "a".into(),
            filename: "main.hlb".into(),
        }
    );
}

#[test]
fn breakpoint_attaches_command_option() {
    // A breakpoint leaves the op chain untouched; the command only travels
    // to the debugger.
    let request = build(
        "fs a() {\n\tscratch\n\tbreakpoint \"ls\" \"-la\"\n\tdir \"/d\"\n}\n",
        &["a"],
    )
    .unwrap();
    let ops = &solved_ops(&request)[0];
    assert_eq!(
        ops,
        &vec![FsOp::Scratch, FsOp::Dir { path: "/d".into() }]
    );
}

#[test]
fn request_serializes_for_the_engine() {
    let request = build("fs a() {\n\tscratch\n}\n", &["a"]).unwrap();
    let json = request.to_json().unwrap();
    assert!(json.contains("\"request\": \"parallel\""));
    assert!(json.contains("\"op\": \"scratch\""));
}
