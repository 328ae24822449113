//! End-to-end pipeline tests: source text through lexing, parsing,
//! analysis, storage allocation, high-level codegen, optimization, and
//! low-level translation.

use cflat::back;
use cflat::common::Context;
use cflat::front;
use cflat::middle;
use cflat::middle::cfg::ControlFlowGraph;
use cflat::middle::codegen::FunctionCode;
use cflat::middle::ir::format_hl_sequence;
use cflat::middle::{lvn, regalloc};

fn front_end(src: &str) -> (Vec<FunctionCode>, Context) {
    let mut unit = front::parse(src, "test.c").expect("parse");
    let mut ctx = Context::new();
    front::analyze(&mut unit, &mut ctx).expect("analyze");
    middle::allocate_storage(&mut unit, &mut ctx).expect("storage");
    let funcs = middle::generate_unit(&unit, &mut ctx).expect("codegen");
    (funcs, ctx)
}

fn hl(src: &str) -> String {
    let (funcs, _) = front_end(src);
    funcs
        .iter()
        .map(|f| format_hl_sequence(&f.iseq))
        .collect::<Vec<_>>()
        .join("\n")
}

fn hl_optimized(src: &str) -> String {
    let (funcs, _) = front_end(src);
    funcs
        .iter()
        .map(|f| {
            let cfg = ControlFlowGraph::build(&f.iseq).unwrap();
            let cfg = lvn::optimize(&cfg);
            let alloc = regalloc::allocate(&cfg, f).unwrap();
            format_hl_sequence(&alloc.cfg.create_instruction_sequence())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn ll(src: &str, optimize: bool) -> String {
    let (funcs, ctx) = front_end(src);
    let ll_funcs: Vec<_> = funcs
        .iter()
        .map(|f| back::generate(f, optimize).expect("low-level translation"))
        .collect();
    back::emit_module(&ll_funcs, &ctx)
}

fn squish(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[test]
fn return_constant_high_level_shape() {
    let text = squish(&hl("int main(void) { return 42; }"));
    assert!(text.contains("enter $0"));
    assert!(text.contains("mov_l vr10, $42"));
    assert!(text.contains("mov_l vr0, vr10"));
    assert!(text.contains("jmp .Lmain_return"));
    assert!(text.contains(".Lmain_return: leave $0"));
    assert!(text.ends_with("ret"));
}

#[test]
fn parameter_home_and_increment() {
    let text = squish(&hl("int f(int x) { return x + 1; }"));
    assert!(text.contains("mov_l vr10, vr1"), "parameter home: {text}");
    assert!(text.contains("add_l vr12, vr10, vr11"), "got: {text}");
    assert!(text.contains("mov_l vr0, vr12"));
    assert!(text.contains("jmp .Lf_return"));
}

#[test]
fn array_element_assignment() {
    let text = squish(&hl(
        "int main(void) { int a[4]; a[2] = 7; return a[2]; }",
    ));
    assert!(text.contains("localaddr vr10, $0"));
    // index scaled by the element size at address width
    assert!(text.contains("mul_q"), "got: {text}");
    assert!(text.contains("$4"));
    assert!(text.contains("add_q"));
    assert!(text.contains("mov_l (vr"), "store through memref: {text}");
}

#[test]
fn struct_field_assignment_uses_offset() {
    let text = squish(&hl(
        "struct P { int x; int y; }; int main(void) { struct P p; p.y = 3; return p.y; }",
    ));
    assert!(text.contains("localaddr"));
    assert!(text.contains("$4"), "y sits at offset 4: {text}");
    assert!(text.contains("add_q"));
    assert!(text.contains("mov_l (vr"), "store through memref: {text}");
}

#[test]
fn lvn_collapses_repeated_addition() {
    let text = hl_optimized("int f(int x, int y) { return (x + y) + (x + y); }");
    assert_eq!(
        text.matches("add_l").count(),
        2,
        "one x+y and the outer sum:\n{text}"
    );
}

#[test]
fn widening_conversion_between_char_and_int() {
    let signed = squish(&hl(
        "int main(void) { char c; int i; c = 'a'; i = c; return i; }",
    ));
    assert!(signed.contains("sconv_bl"), "got: {signed}");
    let unsigned = squish(&hl(
        "int main(void) { unsigned char c; int i; c = 'a'; i = c; return i; }",
    ));
    assert!(unsigned.contains("uconv_bl"), "got: {unsigned}");
}

#[test]
fn low_level_module_structure() {
    let text = ll(
        "int puts(char *s); int g; int main(void) { puts(\"hi\\n\"); g = 1; return g; }",
        false,
    );
    assert!(text.contains("\t.section .rodata"));
    assert!(text.contains("_str0: .string \"hi\\n\""));
    assert!(text.contains("\t.comm g,4,4"));
    assert!(text.contains("\t.section .text"));
    assert!(text.contains("\t.globl main"));
    assert!(text.contains("main:"));
    assert!(squish(&text).contains("call puts"));
}

#[test]
fn frame_sizes_are_sixteen_aligned() {
    let samples = [
        "int main(void) { return 0; }",
        "int main(void) { int a[5]; a[0] = 1; return a[0]; }",
        "struct P { char c; long l; }; int main(void) { struct P p; p.c = 'x'; return 0; }",
        "int f(int a, int b, int c) { return a * b + c; } int main(void) { return f(1, 2, 3); }",
        "int f(int n) { int i; int s; s = 0; i = 0; while (i < n) { s = s + i; i = i + 1; } return s; } int main(void) { return f(10); }",
    ];
    for src in samples {
        for optimize in [false, true] {
            let text = ll(src, optimize);
            for line in text.lines() {
                if let Some(rest) = line.trim().strip_prefix("subq     $") {
                    if let Some(amount) = rest.strip_suffix(", %rsp") {
                        let n: i64 = amount.parse().unwrap();
                        assert_eq!(n % 16, 0, "frame {n} in {src}");
                    }
                }
            }
        }
    }
}

#[test]
fn return_forty_two_low_level() {
    let text = squish(&ll("int main(void) { return 42; }", false));
    assert!(text.contains("pushq %rbp"));
    assert!(text.contains("movq %rsp, %rbp"));
    assert!(text.contains("movl $42,"));
    assert!(text.contains("%eax"));
    assert!(text.contains("ret"));
}

#[test]
fn optimized_return_forty_two_folds_to_immediate() {
    let text = squish(&ll("int main(void) { return 42; }", true));
    assert!(text.contains("movl $42, %eax"), "got: {text}");
}

#[test]
fn conditionals_produce_labeled_jumps() {
    let text = ll(
        "int main(void) { int a; a = 1; if (a < 2) { a = 3; } else { a = 4; } return a; }",
        false,
    );
    let flat = squish(&text);
    assert!(flat.contains("je .L0"), "false edge jumps to else: {text}");
    assert!(flat.contains("jmp .L1"));
    assert!(text.contains(".L0:"));
    assert!(text.contains(".L1:"));
}

#[test]
fn loops_jump_backwards() {
    let text = ll(
        "int main(void) { int i; i = 0; do { i = i + 1; } while (i < 3); return i; }",
        false,
    );
    assert!(
        squish(&text).contains("jne .L0"),
        "do-while retests into the body: {text}"
    );
}

#[test]
fn nested_function_calls_survive_optimization() {
    let src = "int g(int v); int f(int a, int b) { return g(a) + g(b); }";
    let text = ll(src, true);
    assert_eq!(squish(&text).matches("call g").count(), 2);
    // the first result must be preserved across the second call
    assert!(text.contains("%rbp"), "a spill slot is used: {text}");
}

#[test]
fn pointer_dereference_round_trip() {
    let text = squish(&hl(
        "int main(void) { int x; int *p; x = 5; p = &x; return *p; }",
    ));
    // &x forces x into memory, so its reference goes through localaddr
    assert!(text.contains("localaddr"), "got: {text}");
    assert!(text.contains("(vr"), "deref reads through a memref: {text}");
}

#[test]
fn global_array_subscript() {
    let text = squish(&hl("int a[4]; int main(void) { a[2] = 7; return a[2]; }"));
    assert!(text.contains("mov_q vr10, $a"), "global address: {text}");
    assert!(text.contains("mul_q"));
    assert!(text.contains("mov_l (vr"), "got: {text}");
}

#[test]
fn semantic_errors_carry_locations() {
    let mut unit = front::parse("int main(void) { return x; }", "prog.c").unwrap();
    let mut ctx = Context::new();
    let err = front::analyze(&mut unit, &mut ctx).unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.starts_with("prog.c:1:"),
        "location-prefixed error, got: {msg}"
    );
    assert!(msg.contains(":Error: "));
}

#[test]
fn runtime_errors_have_no_location() {
    let mut unit = front::parse(
        "int f(int a, int b, int c, int d, int e, int f, int g, int h, int i, int j) { return a; }",
        "prog.c",
    )
    .unwrap();
    let mut ctx = Context::new();
    front::analyze(&mut unit, &mut ctx).unwrap();
    let err = middle::allocate_storage(&mut unit, &mut ctx).unwrap_err();
    assert_eq!(err.to_string(), "Error: more than nine parameters");
}

#[test]
fn nine_parameters_are_accepted_in_high_level() {
    let src = "int f(int a, int b, int c, int d, int e, int f, int g, int h, int i) { return a; }";
    let text = squish(&hl(src));
    assert!(text.contains("mov_l vr10, vr1"));
    assert!(text.contains("vr9"), "ninth parameter home: {text}");
}
