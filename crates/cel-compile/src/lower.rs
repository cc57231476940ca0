//! AST to IR lowering.
//!
//! The transformer rewrites the parsed CEL-AST into the emission-ready IR:
//!
//! - maximal qualified-identifier chains (`a.b.c`) fuse into a single
//!   [`Ir::Resolve`] carrying the longest-prefix candidate list, with the
//!   compile-time container baked in;
//! - `&&`/`||` are specialized with freshly-allocated temporary names;
//! - `dyn(...)` wrappers are erased, marking the enclosing equality or
//!   arithmetic operation as numerically relaxed;
//! - namespaced extension calls (`math.x`, `base64.x`, `optional.x`)
//!   become global calls under their dotted names;
//! - comprehensions with the exact `filter` shape lower to the
//!   direct-loop fast path.

use cel_compile_parser::{
    BinaryOp, Expr, ListElement, MapEntry, SpannedExpr, StructField, UnaryOp, NOT_STRICTLY_FALSE,
};

use crate::ir::{
    ArithOp, CallTarget, CmpOp, FieldIr, Ir, ListElementIr, MapEntryIr, ResolveCandidate,
    ResolveNode, Strictness,
};

/// Extension namespaces whose member-style calls dispatch as dotted global
/// functions.
const CALL_NAMESPACES: &[&str] = &["math", "base64", "optional"];

/// Individually namespaced functions outside the blanket namespaces.
const NAMESPACED_FUNCTIONS: &[(&str, &str)] = &[("ip", "isCanonical")];

/// Lowering failure (e.g. a call on a non-callable expression).
#[derive(Debug, Clone)]
pub struct LowerError {
    pub message: String,
}

impl std::fmt::Display for LowerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LowerError {}

fn err<T>(message: impl Into<String>) -> Result<T, LowerError> {
    Err(LowerError {
        message: message.into(),
    })
}

/// Lower a parsed expression to IR with the given container namespace.
pub fn lower(ast: &SpannedExpr, container: &str) -> Result<Ir, LowerError> {
    let mut lowering = Lowering {
        container,
        next_temp: 0,
        locals: Vec::new(),
    };
    lowering.lower_expr(ast)
}

struct Lowering<'a> {
    container: &'a str,
    next_temp: u32,
    /// Stack of comprehension/bind-local names currently in scope.
    locals: Vec<String>,
}

impl Lowering<'_> {
    fn fresh_temp(&mut self) -> String {
        let name = format!("t{}", self.next_temp);
        self.next_temp += 1;
        name
    }

    fn is_local(&self, name: &str) -> bool {
        self.locals.iter().any(|l| l == name)
    }

    /// Container prefixes, outermost first, ending with the root namespace:
    /// container "x.y" probes "x.y", then "x", then unqualified.
    fn namespaces(&self) -> Vec<String> {
        let mut namespaces = Vec::new();
        let mut current = self.container;
        while !current.is_empty() {
            namespaces.push(current.to_string());
            current = match current.rfind('.') {
                Some(pos) => &current[..pos],
                None => "",
            };
        }
        namespaces.push(String::new());
        namespaces
    }

    /// Candidate list for a dotted path: container-first, then
    /// longest-prefix within each namespace.
    fn resolve_candidates(&self, rooted: bool, path: &[String]) -> Vec<ResolveCandidate> {
        let namespaces = if rooted {
            vec![String::new()]
        } else {
            self.namespaces()
        };

        let mut candidates = Vec::new();
        for ns in &namespaces {
            for split in (1..=path.len()).rev() {
                let prefix = path[..split].join(".");
                let key = if ns.is_empty() {
                    prefix
                } else {
                    format!("{}.{}", ns, prefix)
                };
                candidates.push(ResolveCandidate {
                    key,
                    fields: path[split..].to_vec(),
                });
            }
        }
        candidates
    }

    fn make_resolve(&self, rooted: bool, path: Vec<String>) -> Ir {
        let display = path.join(".");
        Ir::Resolve(ResolveNode {
            candidates: self.resolve_candidates(rooted, &path),
            display,
        })
    }

    fn lower_expr(&mut self, e: &SpannedExpr) -> Result<Ir, LowerError> {
        match &e.node {
            Expr::Null => Ok(Ir::ConstNull),
            Expr::Bool(b) => Ok(Ir::ConstBool(*b)),
            Expr::Int(i) => Ok(Ir::ConstInt(*i)),
            Expr::UInt(u) => Ok(Ir::ConstUInt(*u)),
            Expr::Float(f) => Ok(Ir::ConstDouble(*f)),
            Expr::String(s) => Ok(Ir::ConstString(s.as_str().into())),
            Expr::Bytes(b) => Ok(Ir::ConstBytes(b.as_slice().into())),

            Expr::Ident(name) => {
                if self.is_local(name) {
                    Ok(Ir::Local(name.clone()))
                } else {
                    Ok(self.make_resolve(false, vec![name.clone()]))
                }
            }
            Expr::RootIdent(name) => Ok(self.make_resolve(true, vec![name.clone()])),

            Expr::Member {
                expr,
                field,
                optional,
            } => {
                // Fuse a maximal non-optional identifier chain into one
                // resolution; anything else is a select on an evaluated
                // operand.
                if !optional {
                    if let Some((rooted, path)) = self.ident_chain(e) {
                        return Ok(self.make_resolve(rooted, path));
                    }
                }
                let operand = self.lower_expr(expr)?;
                Ok(Ir::Select {
                    operand: Box::new(operand),
                    field: field.clone(),
                    optional: *optional,
                })
            }

            Expr::MemberTestOnly { expr, field } => {
                // Binding keys that satisfy has(a.b.c) directly, before the
                // operand is resolved at any shorter prefix.
                let direct_paths = match self.ident_chain_of(expr) {
                    Some((rooted, mut path)) => {
                        path.push(field.clone());
                        self.resolve_candidates(rooted, &path)
                            .into_iter()
                            .filter(|c| c.fields.is_empty())
                            .map(|c| c.key)
                            .collect()
                    }
                    None => Vec::new(),
                };
                let operand = self.lower_expr(expr)?;
                Ok(Ir::TestSelect {
                    operand: Box::new(operand),
                    field: field.clone(),
                    direct_paths,
                })
            }

            Expr::Index {
                expr,
                index,
                optional,
            } => {
                let operand = self.lower_expr(expr)?;
                let index = self.lower_expr(index)?;
                Ok(Ir::Index {
                    operand: Box::new(operand),
                    index: Box::new(index),
                    optional: *optional,
                })
            }

            Expr::List(elements) => {
                let elements = elements
                    .iter()
                    .map(|ListElement { expr, optional }| {
                        Ok(ListElementIr {
                            value: self.lower_expr(expr)?,
                            optional: *optional,
                        })
                    })
                    .collect::<Result<Vec<_>, LowerError>>()?;
                Ok(Ir::List(elements))
            }

            Expr::Map(entries) => {
                let entries = entries
                    .iter()
                    .map(
                        |MapEntry {
                             key,
                             value,
                             optional,
                         }| {
                            Ok(MapEntryIr {
                                key: self.lower_expr(key)?,
                                value: self.lower_expr(value)?,
                                optional: *optional,
                            })
                        },
                    )
                    .collect::<Result<Vec<_>, LowerError>>()?;
                Ok(Ir::Map(entries))
            }

            Expr::Struct { type_name, fields } => {
                let fields = fields
                    .iter()
                    .map(
                        |StructField {
                             name,
                             value,
                             optional,
                         }| {
                            Ok(FieldIr {
                                name: name.clone(),
                                value: self.lower_expr(value)?,
                                optional: *optional,
                            })
                        },
                    )
                    .collect::<Result<Vec<_>, LowerError>>()?;
                Ok(Ir::Struct {
                    type_name: self.qualify_type_name(type_name),
                    fields,
                })
            }

            Expr::Unary { op, expr } => {
                let inner = self.lower_expr(expr)?;
                Ok(match op {
                    UnaryOp::Neg => Ir::Negate(Box::new(inner)),
                    UnaryOp::Not => Ir::Not(Box::new(inner)),
                })
            }

            Expr::Binary { op, left, right } => self.lower_binary(*op, left, right),

            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
            } => Ok(Ir::Ternary {
                cond: Box::new(self.lower_expr(cond)?),
                then_branch: Box::new(self.lower_expr(then_expr)?),
                else_branch: Box::new(self.lower_expr(else_expr)?),
            }),

            Expr::Call { expr, args } => self.lower_call(expr, args),

            Expr::Comprehension {
                iter_var,
                iter_var2,
                iter_range,
                accu_var,
                accu_init,
                loop_condition,
                loop_step,
                result,
            } => {
                if let Some(fast) = self.try_filter_fast(
                    iter_var,
                    iter_var2,
                    iter_range,
                    accu_init,
                    loop_condition,
                    loop_step,
                    result,
                    accu_var,
                )? {
                    return Ok(fast);
                }

                let range_ir = self.lower_expr(iter_range)?;
                let init_ir = self.lower_expr(accu_init)?;

                self.locals.push(accu_var.clone());
                self.locals.push(iter_var.clone());
                if !iter_var2.is_empty() {
                    self.locals.push(iter_var2.clone());
                }
                let cond_ir = self.lower_expr(loop_condition);
                let step_ir = self.lower_expr(loop_step);
                if !iter_var2.is_empty() {
                    self.locals.pop();
                }
                self.locals.pop(); // iter_var
                let result_ir = self.lower_expr(result);
                self.locals.pop(); // accu_var

                Ok(Ir::Comprehension {
                    iter_var: iter_var.clone(),
                    iter_var2: iter_var2.clone(),
                    iter_range: Box::new(range_ir),
                    accu_var: accu_var.clone(),
                    accu_init: Box::new(init_ir),
                    loop_condition: Box::new(cond_ir?),
                    loop_step: Box::new(step_ir?),
                    result: Box::new(result_ir?),
                })
            }

            Expr::Bind {
                var_name,
                init,
                body,
            } => {
                let init_ir = self.lower_expr(init)?;
                self.locals.push(var_name.clone());
                let body_ir = self.lower_expr(body);
                self.locals.pop();
                Ok(Ir::Bind {
                    var_name: var_name.clone(),
                    init: Box::new(init_ir),
                    body: Box::new(body_ir?),
                })
            }
        }
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        left: &SpannedExpr,
        right: &SpannedExpr,
    ) -> Result<Ir, LowerError> {
        // dyn() is erased here; it only leaves the relaxation mark behind
        let (left_inner, left_dyn) = peel_dyn(left);
        let (right_inner, right_dyn) = peel_dyn(right);
        let relaxed = left_dyn || right_dyn;
        let strictness = if relaxed {
            Strictness::Relaxed
        } else {
            Strictness::Strict
        };

        match op {
            BinaryOp::And | BinaryOp::Or => {
                let l = Box::new(self.lower_expr(left)?);
                let r = Box::new(self.lower_expr(right)?);
                let left_tmp = self.fresh_temp();
                let right_tmp = self.fresh_temp();
                Ok(if op == BinaryOp::And {
                    Ir::And {
                        left: l,
                        right: r,
                        left_tmp,
                        right_tmp,
                    }
                } else {
                    Ir::Or {
                        left: l,
                        right: r,
                        left_tmp,
                        right_tmp,
                    }
                })
            }
            BinaryOp::Eq | BinaryOp::Ne => Ok(Ir::Equal {
                negated: op == BinaryOp::Ne,
                strictness,
                left: Box::new(self.lower_expr(left_inner)?),
                right: Box::new(self.lower_expr(right_inner)?),
            }),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let cmp = match op {
                    BinaryOp::Lt => CmpOp::Lt,
                    BinaryOp::Le => CmpOp::Le,
                    BinaryOp::Gt => CmpOp::Gt,
                    _ => CmpOp::Ge,
                };
                Ok(Ir::Compare {
                    op: cmp,
                    left: Box::new(self.lower_expr(left_inner)?),
                    right: Box::new(self.lower_expr(right_inner)?),
                })
            }
            BinaryOp::In => Ok(Ir::In {
                left: Box::new(self.lower_expr(left_inner)?),
                right: Box::new(self.lower_expr(right_inner)?),
            }),
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let arith = match op {
                    BinaryOp::Add => ArithOp::Add,
                    BinaryOp::Sub => ArithOp::Sub,
                    BinaryOp::Mul => ArithOp::Mul,
                    BinaryOp::Div => ArithOp::Div,
                    _ => ArithOp::Mod,
                };
                Ok(Ir::Arith {
                    op: arith,
                    strictness,
                    left: Box::new(self.lower_expr(left_inner)?),
                    right: Box::new(self.lower_expr(right_inner)?),
                })
            }
        }
    }

    fn lower_call(
        &mut self,
        callee: &SpannedExpr,
        args: &[SpannedExpr],
    ) -> Result<Ir, LowerError> {
        match &callee.node {
            Expr::Ident(name) if name == NOT_STRICTLY_FALSE && args.len() == 1 => {
                Ok(Ir::NotStrictlyFalse(Box::new(self.lower_expr(&args[0])?)))
            }
            // dyn() is identity; strictness relaxation is applied by the
            // enclosing operator's lowering
            Expr::Ident(name) if name == "dyn" && args.len() == 1 => self.lower_expr(&args[0]),
            Expr::Ident(name) => {
                let args = self.lower_args(args)?;
                Ok(Ir::Call {
                    target: CallTarget::Global(name.clone()),
                    args,
                })
            }
            Expr::Member {
                expr,
                field,
                optional: false,
            } => {
                // math.x / base64.x / optional.x dispatch as dotted globals
                if let Expr::Ident(ns) = &expr.node {
                    if !self.is_local(ns)
                        && (CALL_NAMESPACES.contains(&ns.as_str())
                            || NAMESPACED_FUNCTIONS.contains(&(ns.as_str(), field.as_str())))
                    {
                        let args = self.lower_args(args)?;
                        return Ok(Ir::Call {
                            target: CallTarget::Global(format!("{}.{}", ns, field)),
                            args,
                        });
                    }
                }
                let mut all_args = Vec::with_capacity(args.len() + 1);
                all_args.push(self.lower_expr(expr)?);
                for arg in args {
                    all_args.push(self.lower_expr(arg)?);
                }
                Ok(Ir::Call {
                    target: CallTarget::Member(field.clone()),
                    args: all_args,
                })
            }
            Expr::Member { optional: true, .. } => {
                err("optional-chained call (`.?method()`) is not supported")
            }
            _ => err("expression is not callable"),
        }
    }

    fn lower_args(&mut self, args: &[SpannedExpr]) -> Result<Vec<Ir>, LowerError> {
        args.iter().map(|a| self.lower_expr(a)).collect()
    }

    /// Collect a pure non-optional identifier chain (`a.b.c`) whose root is
    /// not a comprehension local. Returns (rooted, path).
    fn ident_chain(&self, e: &SpannedExpr) -> Option<(bool, Vec<String>)> {
        self.ident_chain_of(e)
    }

    fn ident_chain_of(&self, e: &SpannedExpr) -> Option<(bool, Vec<String>)> {
        match &e.node {
            Expr::Ident(name) => {
                if self.is_local(name) {
                    None
                } else {
                    Some((false, vec![name.clone()]))
                }
            }
            Expr::RootIdent(name) => Some((true, vec![name.clone()])),
            Expr::Member {
                expr,
                field,
                optional: false,
            } => {
                let (rooted, mut path) = self.ident_chain_of(expr)?;
                path.push(field.clone());
                Some((rooted, path))
            }
            _ => None,
        }
    }

    /// Qualify a struct type name with the container. Already-dotted names
    /// are taken as written; a leading `.` forces root scope.
    fn qualify_type_name(&self, type_name: &str) -> String {
        if let Some(rooted) = type_name.strip_prefix('.') {
            return rooted.to_string();
        }
        if self.container.is_empty() || type_name.contains('.') {
            return type_name.to_string();
        }
        format!("{}.{}", self.container, type_name)
    }

    /// Recognize the comprehension shape the `filter` macro produces and
    /// lower it to the direct-loop fast path.
    #[allow(clippy::too_many_arguments)]
    fn try_filter_fast(
        &mut self,
        iter_var: &str,
        iter_var2: &str,
        iter_range: &SpannedExpr,
        accu_init: &SpannedExpr,
        loop_condition: &SpannedExpr,
        loop_step: &SpannedExpr,
        result: &SpannedExpr,
        accu_var: &str,
    ) -> Result<Option<Ir>, LowerError> {
        if !iter_var2.is_empty() {
            return Ok(None);
        }
        if !matches!(&accu_init.node, Expr::List(elems) if elems.is_empty()) {
            return Ok(None);
        }
        if !matches!(&loop_condition.node, Expr::Bool(true)) {
            return Ok(None);
        }
        if !is_ident(result, accu_var) {
            return Ok(None);
        }

        let predicate = match &loop_step.node {
            Expr::Ternary {
                cond,
                then_expr,
                else_expr,
            } if is_ident(else_expr, accu_var) && is_filter_append(then_expr, accu_var, iter_var) => {
                cond
            }
            _ => return Ok(None),
        };

        let range_ir = self.lower_expr(iter_range)?;
        self.locals.push(iter_var.to_string());
        let predicate_ir = self.lower_expr(predicate);
        self.locals.pop();

        Ok(Some(Ir::FilterFast {
            iter_var: iter_var.to_string(),
            iter_range: Box::new(range_ir),
            predicate: Box::new(predicate_ir?),
        }))
    }
}

fn is_ident(e: &SpannedExpr, name: &str) -> bool {
    matches!(&e.node, Expr::Ident(n) if n == name)
}

/// `__result__ + [v]`
fn is_filter_append(e: &SpannedExpr, accu_var: &str, iter_var: &str) -> bool {
    match &e.node {
        Expr::Binary {
            op: BinaryOp::Add,
            left,
            right,
        } => {
            is_ident(left, accu_var)
                && matches!(
                    &right.node,
                    Expr::List(elems)
                        if elems.len() == 1
                            && !elems[0].optional
                            && is_ident(&elems[0].expr, iter_var)
                )
        }
        _ => false,
    }
}

/// Strip a syntactic `dyn(...)` wrapper, reporting whether one was present.
fn peel_dyn(e: &SpannedExpr) -> (&SpannedExpr, bool) {
    if let Expr::Call { expr, args } = &e.node {
        if let Expr::Ident(name) = &expr.node {
            if name == "dyn" && args.len() == 1 {
                return (&args[0], true);
            }
        }
    }
    (e, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cel_compile_parser::parse;

    fn lower_src(src: &str) -> Ir {
        let ast = parse(src).expect("parse");
        lower(&ast, "").expect("lower")
    }

    fn lower_src_in(src: &str, container: &str) -> Ir {
        let ast = parse(src).expect("parse");
        lower(&ast, container).expect("lower")
    }

    #[test]
    fn fuses_qualified_chains() {
        let ir = lower_src("a.b.c");
        match ir {
            Ir::Resolve(node) => {
                assert_eq!(node.display, "a.b.c");
                let keys: Vec<&str> = node.candidates.iter().map(|c| c.key.as_str()).collect();
                assert_eq!(keys, vec!["a.b.c", "a.b", "a"]);
                assert_eq!(node.candidates[0].fields, Vec::<String>::new());
                assert_eq!(node.candidates[1].fields, vec!["c"]);
                assert_eq!(node.candidates[2].fields, vec!["b", "c"]);
            }
            other => panic!("expected resolve, got {:?}", other),
        }
    }

    #[test]
    fn container_candidates_come_first() {
        let ir = lower_src_in("z", "x.y");
        match ir {
            Ir::Resolve(node) => {
                let keys: Vec<&str> = node.candidates.iter().map(|c| c.key.as_str()).collect();
                assert_eq!(keys, vec!["x.y.z", "x.z", "z"]);
            }
            other => panic!("expected resolve, got {:?}", other),
        }
    }

    #[test]
    fn root_ident_skips_container() {
        let ir = lower_src_in(".z", "x.y");
        match ir {
            Ir::Resolve(node) => {
                let keys: Vec<&str> = node.candidates.iter().map(|c| c.key.as_str()).collect();
                assert_eq!(keys, vec!["z"]);
            }
            other => panic!("expected resolve, got {:?}", other),
        }
    }

    #[test]
    fn logical_ops_get_fresh_temps() {
        let ir = lower_src("a && b || c");
        match ir {
            Ir::Or {
                left,
                left_tmp,
                right_tmp,
                ..
            } => {
                assert_ne!(left_tmp, right_tmp);
                match *left {
                    Ir::And {
                        left_tmp: inner_l,
                        right_tmp: inner_r,
                        ..
                    } => {
                        let mut all = vec![inner_l, inner_r, left_tmp, right_tmp];
                        all.sort();
                        all.dedup();
                        assert_eq!(all.len(), 4, "temporaries must be unique");
                    }
                    other => panic!("expected and, got {:?}", other),
                }
            }
            other => panic!("expected or, got {:?}", other),
        }
    }

    #[test]
    fn dyn_relaxes_equality() {
        match lower_src("dyn(1) == 1.0") {
            Ir::Equal { strictness, .. } => assert_eq!(strictness, Strictness::Relaxed),
            other => panic!("expected equal, got {:?}", other),
        }
        match lower_src("1 == 1.0") {
            Ir::Equal { strictness, .. } => assert_eq!(strictness, Strictness::Strict),
            other => panic!("expected equal, got {:?}", other),
        }
    }

    #[test]
    fn dyn_alone_is_identity() {
        assert_eq!(lower_src("dyn(1)"), Ir::ConstInt(1));
    }

    #[test]
    fn filter_lowers_to_fast_path() {
        match lower_src("[1, 2].filter(x, x > 1)") {
            Ir::FilterFast { iter_var, .. } => assert_eq!(iter_var, "x"),
            other => panic!("expected filter fast path, got {:?}", other),
        }
    }

    #[test]
    fn map_macro_stays_general() {
        assert!(matches!(
            lower_src("[1, 2].map(x, x * 2)"),
            Ir::Comprehension { .. }
        ));
        // filter+transform map is not the filter shape either
        assert!(matches!(
            lower_src("[1, 2].map(x, x > 0, x * 2)"),
            Ir::Comprehension { .. }
        ));
    }

    #[test]
    fn comprehension_vars_are_locals() {
        match lower_src("[1].all(x, x > 0)") {
            Ir::Comprehension { loop_step, .. } => {
                // x inside the predicate is a local, not a binding resolve
                fn has_local(ir: &Ir, name: &str) -> bool {
                    match ir {
                        Ir::Local(n) => n == name,
                        Ir::And { left, right, .. } | Ir::Or { left, right, .. } => {
                            has_local(left, name) || has_local(right, name)
                        }
                        Ir::Compare { left, right, .. } => {
                            has_local(left, name) || has_local(right, name)
                        }
                        _ => false,
                    }
                }
                assert!(has_local(&loop_step, "x"));
            }
            other => panic!("expected comprehension, got {:?}", other),
        }
    }

    #[test]
    fn namespaced_calls_become_globals() {
        match lower_src("math.greatest(1, 2)") {
            Ir::Call { target, args } => {
                assert_eq!(target, CallTarget::Global("math.greatest".to_string()));
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn member_calls_carry_receiver() {
        match lower_src("\"ab\".startsWith(\"a\")") {
            Ir::Call { target, args } => {
                assert_eq!(target, CallTarget::Member("startsWith".to_string()));
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn struct_type_names_qualify_with_container() {
        match lower_src_in("TestAllTypes{}", "cel.expr.conformance.proto3") {
            Ir::Struct { type_name, .. } => {
                assert_eq!(type_name, "cel.expr.conformance.proto3.TestAllTypes");
            }
            other => panic!("expected struct, got {:?}", other),
        }
        // Already-qualified names are taken as written
        match lower_src_in("google.protobuf.Int32Value{}", "cel.test") {
            Ir::Struct { type_name, .. } => {
                assert_eq!(type_name, "google.protobuf.Int32Value");
            }
            other => panic!("expected struct, got {:?}", other),
        }
    }

    #[test]
    fn has_collects_direct_paths() {
        match lower_src("has(a.b.c)") {
            Ir::TestSelect {
                direct_paths,
                field,
                ..
            } => {
                assert_eq!(field, "c");
                assert_eq!(direct_paths, vec!["a.b.c"]);
            }
            other => panic!("expected test select, got {:?}", other),
        }
    }

    #[test]
    fn call_on_non_callable_fails() {
        let ast = parse("(1 + 2)(3)").expect("parse");
        assert!(lower(&ast, "").is_err());
    }
}
