//! IR serialization to diagnostic source.
//!
//! Rust offers no runtime code loading, so the compiled program executes
//! as an IR interpreter; this module renders the statement-level program
//! the emitter would hand a dynamic host. The rendering is exact about
//! the parts that matter when debugging a compilation: declared `t<n>`
//! temporaries for the logical operators, the spelled-out resolution
//! cascade for every qualified identifier, and the runtime-table dispatch
//! for named functions.

use crate::ir::{Ir, ResolveNode, Strictness};

/// Render a compiled program.
pub fn emit(ir: &Ir) -> String {
    let body = emit_expr(ir, 1);
    format!("fn evaluate(bindings, rt) {{\n  return {};\n}}\n", body)
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

fn emit_expr(ir: &Ir, depth: usize) -> String {
    match ir {
        Ir::ConstNull => "null".to_string(),
        Ir::ConstBool(b) => b.to_string(),
        Ir::ConstInt(i) => i.to_string(),
        Ir::ConstUInt(u) => format!("{}u", u),
        Ir::ConstDouble(d) => crate::eval::Value::Double(*d).to_string(),
        Ir::ConstString(s) => quote(s),
        Ir::ConstBytes(b) => format!("b{}", quote(&String::from_utf8_lossy(b))),

        Ir::Local(name) => name.clone(),

        Ir::Resolve(node) => emit_resolve(node),

        Ir::Select {
            operand,
            field,
            optional,
        } => format!(
            "rt.{}({}, {})",
            if *optional { "select_opt" } else { "select" },
            emit_expr(operand, depth),
            quote(field)
        ),

        Ir::TestSelect {
            operand,
            field,
            direct_paths,
        } => {
            let mut parts = Vec::new();
            for path in direct_paths {
                parts.push(format!("bindings[{}]", quote(path)));
            }
            parts.push(format!("{}.{}", emit_expr(operand, depth), field));
            format!("rt.has({})", parts.join(" | "))
        }

        Ir::Index {
            operand,
            index,
            optional,
        } => format!(
            "rt.{}({}, {})",
            if *optional { "index_opt" } else { "index" },
            emit_expr(operand, depth),
            emit_expr(index, depth)
        ),

        Ir::Arith {
            op,
            strictness,
            left,
            right,
        } => {
            let name = match op {
                crate::ir::ArithOp::Add => "add",
                crate::ir::ArithOp::Sub => "sub",
                crate::ir::ArithOp::Mul => "mul",
                crate::ir::ArithOp::Div => "div",
                crate::ir::ArithOp::Mod => "mod_",
            };
            format!(
                "rt.{}{}({}, {})",
                name,
                dyn_suffix(*strictness),
                emit_expr(left, depth),
                emit_expr(right, depth)
            )
        }

        Ir::Compare { op, left, right } => {
            let name = match op {
                crate::ir::CmpOp::Lt => "lt",
                crate::ir::CmpOp::Le => "le",
                crate::ir::CmpOp::Gt => "gt",
                crate::ir::CmpOp::Ge => "ge",
            };
            format!(
                "rt.{}({}, {})",
                name,
                emit_expr(left, depth),
                emit_expr(right, depth)
            )
        }

        Ir::Equal {
            negated,
            strictness,
            left,
            right,
        } => format!(
            "rt.{}{}({}, {})",
            if *negated { "ne" } else { "eq" },
            dyn_suffix(*strictness),
            emit_expr(left, depth),
            emit_expr(right, depth)
        ),

        Ir::In { left, right } => format!(
            "rt.in_({}, {})",
            emit_expr(left, depth),
            emit_expr(right, depth)
        ),

        Ir::Negate(inner) => format!("rt.neg({})", emit_expr(inner, depth)),
        Ir::Not(inner) => format!("rt.not({})", emit_expr(inner, depth)),
        Ir::NotStrictlyFalse(inner) => {
            format!("rt.not_strictly_false({})", emit_expr(inner, depth))
        }

        Ir::And {
            left,
            right,
            left_tmp,
            right_tmp,
        } => emit_logical("and", left, right, left_tmp, right_tmp, depth),

        Ir::Or {
            left,
            right,
            left_tmp,
            right_tmp,
        } => emit_logical("or", left, right, left_tmp, right_tmp, depth),

        Ir::Ternary {
            cond,
            then_branch,
            else_branch,
        } => format!(
            "(rt.truth({}) ? {} : {})",
            emit_expr(cond, depth),
            emit_expr(then_branch, depth),
            emit_expr(else_branch, depth)
        ),

        Ir::List(elements) => {
            let rendered: Vec<String> = elements
                .iter()
                .map(|e| {
                    let text = emit_expr(&e.value, depth);
                    if e.optional {
                        format!("?{}", text)
                    } else {
                        text
                    }
                })
                .collect();
            format!("[{}]", rendered.join(", "))
        }

        Ir::Map(entries) => {
            let rendered: Vec<String> = entries
                .iter()
                .map(|e| {
                    let prefix = if e.optional { "?" } else { "" };
                    format!(
                        "{}{}: {}",
                        prefix,
                        emit_expr(&e.key, depth),
                        emit_expr(&e.value, depth)
                    )
                })
                .collect();
            format!("rt.map({{{}}})", rendered.join(", "))
        }

        Ir::Struct { type_name, fields } => {
            let rendered: Vec<String> = fields
                .iter()
                .map(|f| {
                    let prefix = if f.optional { "?" } else { "" };
                    format!("{}{}: {}", prefix, f.name, emit_expr(&f.value, depth))
                })
                .collect();
            format!(
                "rt.struct({}, {{{}}})",
                quote(type_name),
                rendered.join(", ")
            )
        }

        Ir::Call { target, args } => {
            let rendered: Vec<String> = args.iter().map(|a| emit_expr(a, depth)).collect();
            format!(
                "rt.fns[{}]({})",
                quote(target.name()),
                rendered.join(", ")
            )
        }

        Ir::Comprehension {
            iter_var,
            iter_var2,
            iter_range,
            accu_var,
            accu_init,
            loop_condition,
            loop_step,
            result,
        } => {
            let pad = indent(depth + 1);
            let vars = if iter_var2.is_empty() {
                iter_var.clone()
            } else {
                format!("{}, {}", iter_var, iter_var2)
            };
            format!(
                "comprehension(\n{pad}for {vars} in {};\n{pad}{} = {};\n{pad}while {};\n{pad}{} = {};\n{pad}yield {}\n{})",
                emit_expr(iter_range, depth + 1),
                accu_var,
                emit_expr(accu_init, depth + 1),
                emit_expr(loop_condition, depth + 1),
                accu_var,
                emit_expr(loop_step, depth + 1),
                emit_expr(result, depth + 1),
                indent(depth)
            )
        }

        Ir::FilterFast {
            iter_var,
            iter_range,
            predicate,
        } => format!(
            "rt.filter({} in {}, {})",
            iter_var,
            emit_expr(iter_range, depth),
            emit_expr(predicate, depth)
        ),

        Ir::Bind {
            var_name,
            init,
            body,
        } => format!(
            "{{ let {} = {}; {} }}",
            var_name,
            emit_expr(init, depth),
            emit_expr(body, depth)
        ),
    }
}

/// The two-temporary form of the logical operators: both sides are
/// declared, assigned, and only then combined by the cascade.
fn emit_logical(
    name: &str,
    left: &Ir,
    right: &Ir,
    left_tmp: &str,
    right_tmp: &str,
    depth: usize,
) -> String {
    let pad = indent(depth + 1);
    format!(
        "{{\n{pad}let {} = {};\n{pad}let {} = {};\n{pad}rt.{}({}, {})\n{}}}",
        left_tmp,
        emit_expr(left, depth + 1),
        right_tmp,
        emit_expr(right, depth + 1),
        name,
        left_tmp,
        right_tmp,
        indent(depth)
    )
}

/// The resolution cascade, longest prefix first:
/// `resolve(bindings["a.b.c"] | bindings["a.b"].c | bindings["a"].b.c)`.
fn emit_resolve(node: &ResolveNode) -> String {
    let parts: Vec<String> = node
        .candidates
        .iter()
        .map(|c| {
            let mut text = format!("bindings[{}]", quote(&c.key));
            for field in &c.fields {
                text.push('.');
                text.push_str(field);
            }
            text
        })
        .collect();
    format!("resolve({})", parts.join(" | "))
}

fn dyn_suffix(strictness: Strictness) -> &'static str {
    match strictness {
        Strictness::Strict => "",
        Strictness::Relaxed => "_dyn",
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::lower;

    fn emit_src(src: &str) -> String {
        let ast = cel_compile_parser::parse(src).expect("parse");
        let ir = lower(&ast, "").expect("lower");
        emit(&ir)
    }

    #[test]
    fn emits_resolution_cascade() {
        let source = emit_src("a.b.c");
        assert!(source.contains("bindings[\"a.b.c\"]"));
        assert!(source.contains("bindings[\"a.b\"].c"));
        assert!(source.contains("bindings[\"a\"].b.c"));
    }

    #[test]
    fn emits_logical_temporaries() {
        let source = emit_src("a && b");
        assert!(source.contains("let t0 ="));
        assert!(source.contains("let t1 ="));
        assert!(source.contains("rt.and(t0, t1)"));
    }

    #[test]
    fn emits_dyn_suffix_for_relaxed_ops() {
        assert!(emit_src("dyn(1) == 1.0").contains("rt.eq_dyn("));
        assert!(emit_src("1 == 2").contains("rt.eq("));
    }

    #[test]
    fn emits_runtime_table_dispatch() {
        assert!(emit_src("math.greatest(1, 2)").contains("rt.fns[\"math.greatest\"]"));
        assert!(emit_src("size(\"x\")").contains("rt.fns[\"size\"]"));
    }

    #[test]
    fn emits_comprehension_protocol() {
        let source = emit_src("[1].all(x, x > 0)");
        assert!(source.contains("comprehension("));
        assert!(source.contains("for x in"));
        assert!(source.contains("__result__ ="));
        assert!(source.contains("rt.not_strictly_false"));
    }

    #[test]
    fn emits_filter_fast_path() {
        let source = emit_src("[1].filter(x, x > 0)");
        assert!(source.contains("rt.filter(x in"));
    }
}
