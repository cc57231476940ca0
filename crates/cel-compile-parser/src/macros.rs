//! Macro system for CEL parser.
//!
//! Macros in CEL are syntactic transformations that expand at parse time.
//! They transform specific call patterns (like `list.all(x, cond)`) into
//! expanded AST nodes (like `Comprehension`).
//!
//! This module provides:
//! - [`Macro`] - Definition of a single macro
//! - [`MacroRegistry`] - Collection of macros with lookup by key
//! - [`MacroExpander`] - The expansion function type
//! - [`MacroContext`] - Context passed to expanders for node creation
//!
//! # Architecture
//!
//! Macros are keyed by `name:arg_count:is_receiver` (e.g., `"all:2:true"`).
//! This allows separate definitions for different argument counts.
//! Lookup tries the exact key first, then falls back to a var-arg key.

use std::collections::HashMap;

use crate::ast::{BinaryOp, Expr, ListElement, Span, Spanned, SpannedExpr, UnaryOp};

/// Accumulator variable name used in comprehension expansions.
///
/// The parser rejects user identifiers of the `__name__` shape, so this
/// cannot collide with user code.
pub const ACCU_VAR: &str = "__result__";

/// Internal probe wrapped around comprehension loop conditions: true unless
/// the operand is strictly `false`. Errors pass the probe, which is what
/// lets `all`/`exists` absorb predicate errors when a decisive element
/// exists.
pub const NOT_STRICTLY_FALSE: &str = "@not_strictly_false";

/// Synthetic receiver binding used by `optMap`/`optFlatMap` so the target
/// optional is evaluated exactly once.
const OPT_RECEIVER_VAR: &str = "@optional_target";

/// Indicates whether a macro is called as a global function or as a method on a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroStyle {
    /// Global function call: `macro_name(args...)`
    Global,
    /// Receiver-style method call: `receiver.macro_name(args...)`
    Receiver,
}

/// Specifies the expected argument count for a macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgCount {
    /// Exact number of arguments required.
    Exact(usize),
    /// Variable arguments with a minimum count.
    VarArg(usize),
}

impl ArgCount {
    /// Check if the given argument count matches this specification.
    pub fn matches(&self, count: usize) -> bool {
        match self {
            ArgCount::Exact(n) => count == *n,
            ArgCount::VarArg(min) => count >= *min,
        }
    }

    /// Get the count value (exact count or minimum for vararg).
    pub fn count(&self) -> usize {
        match self {
            ArgCount::Exact(n) => *n,
            ArgCount::VarArg(min) => *min,
        }
    }

    /// Returns true if this is a vararg specification.
    pub fn is_vararg(&self) -> bool {
        matches!(self, ArgCount::VarArg(_))
    }
}

/// Result of macro expansion.
#[derive(Debug)]
pub enum MacroExpansion {
    /// Macro was successfully expanded to this expression.
    Expanded(SpannedExpr),
    /// Macro signature matched but expansion failed (e.g., invalid arguments).
    /// The string contains an error message.
    Error(String),
}

/// Context provided to macro expanders for creating AST nodes.
pub struct MacroContext<'a> {
    /// Function to allocate the next unique node ID.
    next_id_fn: &'a mut dyn FnMut() -> i64,
}

impl<'a> MacroContext<'a> {
    /// Create a new macro context.
    pub fn new(next_id_fn: &'a mut dyn FnMut() -> i64) -> Self {
        Self { next_id_fn }
    }

    /// Allocate the next unique node ID.
    pub fn next_id(&mut self) -> i64 {
        (self.next_id_fn)()
    }
}

/// Type alias for macro expander functions.
///
/// # Parameters
/// - `ctx`: Macro context for ID allocation
/// - `span`: Source span of the entire call expression
/// - `receiver`: The receiver expression for receiver-style macros, None for global macros
/// - `args`: The arguments passed to the macro
///
/// # Returns
/// - `MacroExpansion::Expanded(expr)` on successful expansion
/// - `MacroExpansion::Error(msg)` if expansion fails
pub type MacroExpander = fn(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion;

/// Definition of a single macro.
#[derive(Clone)]
pub struct Macro {
    /// The macro name (e.g., "all", "has", "map").
    pub name: &'static str,
    /// Whether this is a global or receiver-style macro.
    pub style: MacroStyle,
    /// The expected argument count.
    pub arg_count: ArgCount,
    /// The expansion function.
    pub expander: MacroExpander,
}

impl Macro {
    /// Create a new macro definition.
    pub const fn new(
        name: &'static str,
        style: MacroStyle,
        arg_count: ArgCount,
        expander: MacroExpander,
    ) -> Self {
        Self {
            name,
            style,
            arg_count,
            expander,
        }
    }

    /// Generate the lookup key for this macro.
    pub fn key(&self) -> String {
        make_key(
            self.name,
            self.arg_count.count(),
            self.style == MacroStyle::Receiver,
        )
    }
}

impl std::fmt::Debug for Macro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Macro")
            .field("name", &self.name)
            .field("style", &self.style)
            .field("arg_count", &self.arg_count)
            .finish_non_exhaustive()
    }
}

/// Generate a lookup key for a macro.
fn make_key(name: &str, arg_count: usize, is_receiver: bool) -> String {
    format!("{}:{}:{}", name, arg_count, is_receiver)
}

/// Registry of macros with efficient lookup.
///
/// Macros are keyed by `name:arg_count:is_receiver`.
/// Lookup tries the exact key first, then falls back to a vararg key.
#[derive(Debug, Clone, Default)]
pub struct MacroRegistry {
    /// Map from key to macro definition.
    macros: HashMap<String, Macro>,
    /// Track vararg macros by name:is_receiver for fallback lookup.
    vararg_keys: HashMap<String, usize>,
}

impl MacroRegistry {
    /// Create an empty macro registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the standard CEL macros.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for macro_def in STANDARD_MACROS {
            registry.register(macro_def.clone());
        }
        registry
    }

    /// Register a macro in the registry.
    pub fn register(&mut self, macro_def: Macro) {
        let key = macro_def.key();

        // Track vararg macros for fallback lookup
        if macro_def.arg_count.is_vararg() {
            let vararg_key = format!(
                "{}:{}",
                macro_def.name,
                macro_def.style == MacroStyle::Receiver
            );
            self.vararg_keys
                .insert(vararg_key, macro_def.arg_count.count());
        }

        self.macros.insert(key, macro_def);
    }

    /// Look up a macro by name, argument count, and receiver style.
    ///
    /// First tries exact match, then falls back to vararg match if applicable.
    pub fn lookup(&self, name: &str, arg_count: usize, is_receiver: bool) -> Option<&Macro> {
        // Try exact match first
        let exact_key = make_key(name, arg_count, is_receiver);
        if let Some(m) = self.macros.get(&exact_key) {
            return Some(m);
        }

        // Try vararg fallback
        let vararg_lookup_key = format!("{}:{}", name, is_receiver);
        if let Some(&min_args) = self.vararg_keys.get(&vararg_lookup_key) {
            if arg_count >= min_args {
                let vararg_key = make_key(name, min_args, is_receiver);
                return self.macros.get(&vararg_key);
            }
        }

        None
    }

    /// Check if the registry contains a macro with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.macros.values().any(|m| m.name == name)
    }

    /// Get an iterator over all registered macros.
    pub fn iter(&self) -> impl Iterator<Item = &Macro> {
        self.macros.values()
    }

    /// Get the number of registered macros.
    pub fn len(&self) -> usize {
        self.macros.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

// ============================================================================
// Standard CEL Macros
// ============================================================================

/// Standard CEL macros, including the optional-extension lambda macros.
pub static STANDARD_MACROS: &[Macro] = &[
    // has(m.x) - global, 1 arg
    Macro::new("has", MacroStyle::Global, ArgCount::Exact(1), expand_has),
    // all - receiver, 2 or 3 args
    Macro::new("all", MacroStyle::Receiver, ArgCount::Exact(2), expand_all_2arg),
    Macro::new("all", MacroStyle::Receiver, ArgCount::Exact(3), expand_all_3arg),
    // exists - receiver, 2 or 3 args
    Macro::new(
        "exists",
        MacroStyle::Receiver,
        ArgCount::Exact(2),
        expand_exists_2arg,
    ),
    Macro::new(
        "exists",
        MacroStyle::Receiver,
        ArgCount::Exact(3),
        expand_exists_3arg,
    ),
    // exists_one - receiver, 2 or 3 args
    Macro::new(
        "exists_one",
        MacroStyle::Receiver,
        ArgCount::Exact(2),
        expand_exists_one_2arg,
    ),
    Macro::new(
        "exists_one",
        MacroStyle::Receiver,
        ArgCount::Exact(3),
        expand_exists_one_3arg,
    ),
    // map - receiver, 2 args (transform) or 3 args (filter + transform)
    Macro::new("map", MacroStyle::Receiver, ArgCount::Exact(2), expand_map_2arg),
    Macro::new("map", MacroStyle::Receiver, ArgCount::Exact(3), expand_map_3arg),
    // filter - receiver, 2 args
    Macro::new(
        "filter",
        MacroStyle::Receiver,
        ArgCount::Exact(2),
        expand_filter,
    ),
    // optMap / optFlatMap - optional-extension lambda macros
    Macro::new(
        "optMap",
        MacroStyle::Receiver,
        ArgCount::Exact(2),
        expand_opt_map,
    ),
    Macro::new(
        "optFlatMap",
        MacroStyle::Receiver,
        ArgCount::Exact(2),
        expand_opt_flat_map,
    ),
];

// === Helper Functions ===

/// Create a synthetic spanned expression.
fn synthetic(ctx: &mut MacroContext, node: Expr, span: Span) -> SpannedExpr {
    Spanned::new(ctx.next_id(), node, span)
}

/// Reference to the accumulator variable.
fn accu_ref(ctx: &mut MacroContext, span: &Span) -> SpannedExpr {
    synthetic(ctx, Expr::Ident(ACCU_VAR.to_string()), span.clone())
}

/// Wrap an expression in the `@not_strictly_false` probe.
fn not_strictly_false(ctx: &mut MacroContext, arg: SpannedExpr, span: &Span) -> SpannedExpr {
    let callee = synthetic(ctx, Expr::Ident(NOT_STRICTLY_FALSE.to_string()), span.clone());
    synthetic(
        ctx,
        Expr::Call {
            expr: Box::new(callee),
            args: vec![arg],
        },
        span.clone(),
    )
}

/// Extract an iteration variable name from an expression.
fn extract_iter_var(expr: &SpannedExpr) -> Result<String, String> {
    match &expr.node {
        Expr::Ident(name) => Ok(name.clone()),
        _ => Err("iteration variable must be an identifier".to_string()),
    }
}

/// Pull the receiver and 1 or 2 iteration variable names out of a macro call.
/// The condition/transform expression is the last argument.
fn comprehension_parts(
    name: &str,
    receiver: Option<SpannedExpr>,
    args: &[SpannedExpr],
    two_var: bool,
) -> Result<(SpannedExpr, String, String), String> {
    let receiver = receiver.ok_or_else(|| format!("{}() requires a receiver", name))?;
    let iter_var = extract_iter_var(&args[0])?;
    let iter_var2 = if two_var {
        extract_iter_var(&args[1])?
    } else {
        String::new()
    };
    if two_var && iter_var == iter_var2 {
        return Err(format!(
            "{}() iteration variables must be distinct",
            name
        ));
    }
    Ok((receiver, iter_var, iter_var2))
}

// === has() Macro ===

/// Expand `has(m.x)` to `MemberTestOnly { expr: m, field: x }`.
fn expand_has(
    ctx: &mut MacroContext,
    span: Span,
    _receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    let arg = match args.into_iter().next() {
        Some(arg) => arg,
        None => return MacroExpansion::Error("has() requires 1 argument".to_string()),
    };

    match arg.node {
        Expr::Member {
            expr,
            field,
            optional: false,
        } => {
            let result = Spanned::new(ctx.next_id(), Expr::MemberTestOnly { expr, field }, span);
            MacroExpansion::Expanded(result)
        }
        _ => MacroExpansion::Error(
            "has() argument must be a field selection (e.g., has(m.x))".to_string(),
        ),
    }
}

// === all() Macro ===

fn expand_all_2arg(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    expand_all_impl(ctx, span, receiver, args, false)
}

fn expand_all_3arg(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    expand_all_impl(ctx, span, receiver, args, true)
}

/// `x.all(v, P)` loops while the accumulator is not strictly false,
/// accumulating `__result__ && P`.
fn expand_all_impl(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
    two_var: bool,
) -> MacroExpansion {
    let (receiver, iter_var, iter_var2) =
        match comprehension_parts("all", receiver, &args, two_var) {
            Ok(parts) => parts,
            Err(msg) => return MacroExpansion::Error(msg),
        };
    let cond = args.into_iter().last().unwrap();

    let accu_init = synthetic(ctx, Expr::Bool(true), span.clone());

    let probe_arg = accu_ref(ctx, &span);
    let loop_condition = not_strictly_false(ctx, probe_arg, &span);

    let step_accu = accu_ref(ctx, &span);
    let loop_step = synthetic(
        ctx,
        Expr::Binary {
            op: BinaryOp::And,
            left: Box::new(step_accu),
            right: Box::new(cond),
        },
        span.clone(),
    );

    let result = accu_ref(ctx, &span);

    MacroExpansion::Expanded(Spanned::new(
        ctx.next_id(),
        Expr::Comprehension {
            iter_var,
            iter_var2,
            iter_range: Box::new(receiver),
            accu_var: ACCU_VAR.to_string(),
            accu_init: Box::new(accu_init),
            loop_condition: Box::new(loop_condition),
            loop_step: Box::new(loop_step),
            result: Box::new(result),
        },
        span,
    ))
}

// === exists() Macro ===

fn expand_exists_2arg(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    expand_exists_impl(ctx, span, receiver, args, false)
}

fn expand_exists_3arg(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    expand_exists_impl(ctx, span, receiver, args, true)
}

/// `x.exists(v, P)` is the mirror of `all`: loops while `!__result__` is
/// not strictly false, accumulating `__result__ || P`.
fn expand_exists_impl(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
    two_var: bool,
) -> MacroExpansion {
    let (receiver, iter_var, iter_var2) =
        match comprehension_parts("exists", receiver, &args, two_var) {
            Ok(parts) => parts,
            Err(msg) => return MacroExpansion::Error(msg),
        };
    let cond = args.into_iter().last().unwrap();

    let accu_init = synthetic(ctx, Expr::Bool(false), span.clone());

    let probe_accu = accu_ref(ctx, &span);
    let negated = synthetic(
        ctx,
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(probe_accu),
        },
        span.clone(),
    );
    let loop_condition = not_strictly_false(ctx, negated, &span);

    let step_accu = accu_ref(ctx, &span);
    let loop_step = synthetic(
        ctx,
        Expr::Binary {
            op: BinaryOp::Or,
            left: Box::new(step_accu),
            right: Box::new(cond),
        },
        span.clone(),
    );

    let result = accu_ref(ctx, &span);

    MacroExpansion::Expanded(Spanned::new(
        ctx.next_id(),
        Expr::Comprehension {
            iter_var,
            iter_var2,
            iter_range: Box::new(receiver),
            accu_var: ACCU_VAR.to_string(),
            accu_init: Box::new(accu_init),
            loop_condition: Box::new(loop_condition),
            loop_step: Box::new(loop_step),
            result: Box::new(result),
        },
        span,
    ))
}

// === exists_one() Macro ===

fn expand_exists_one_2arg(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    expand_exists_one_impl(ctx, span, receiver, args, false)
}

fn expand_exists_one_3arg(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    expand_exists_one_impl(ctx, span, receiver, args, true)
}

/// `x.exists_one(v, P)` counts matches over the full range; the result is
/// `count == 1`. Predicate errors propagate (no absorption).
fn expand_exists_one_impl(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
    two_var: bool,
) -> MacroExpansion {
    let (receiver, iter_var, iter_var2) =
        match comprehension_parts("exists_one", receiver, &args, two_var) {
            Ok(parts) => parts,
            Err(msg) => return MacroExpansion::Error(msg),
        };
    let cond = args.into_iter().last().unwrap();

    let accu_init = synthetic(ctx, Expr::Int(0), span.clone());
    let loop_condition = synthetic(ctx, Expr::Bool(true), span.clone());

    let step_accu = accu_ref(ctx, &span);
    let one = synthetic(ctx, Expr::Int(1), span.clone());
    let increment = synthetic(
        ctx,
        Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(step_accu),
            right: Box::new(one),
        },
        span.clone(),
    );
    let keep_accu = accu_ref(ctx, &span);
    let loop_step = synthetic(
        ctx,
        Expr::Ternary {
            cond: Box::new(cond),
            then_expr: Box::new(increment),
            else_expr: Box::new(keep_accu),
        },
        span.clone(),
    );

    let result_accu = accu_ref(ctx, &span);
    let one_result = synthetic(ctx, Expr::Int(1), span.clone());
    let result = synthetic(
        ctx,
        Expr::Binary {
            op: BinaryOp::Eq,
            left: Box::new(result_accu),
            right: Box::new(one_result),
        },
        span.clone(),
    );

    MacroExpansion::Expanded(Spanned::new(
        ctx.next_id(),
        Expr::Comprehension {
            iter_var,
            iter_var2,
            iter_range: Box::new(receiver),
            accu_var: ACCU_VAR.to_string(),
            accu_init: Box::new(accu_init),
            loop_condition: Box::new(loop_condition),
            loop_step: Box::new(loop_step),
            result: Box::new(result),
        },
        span,
    ))
}

// === map() Macro ===

fn expand_map_2arg(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    expand_map_impl(ctx, span, receiver, args, false)
}

fn expand_map_3arg(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    expand_map_impl(ctx, span, receiver, args, true)
}

/// `x.map(v, T)` appends `T` for each element; `x.map(v, F, T)` appends
/// only where `F` holds.
fn expand_map_impl(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
    filtered: bool,
) -> MacroExpansion {
    let (receiver, iter_var, _) = match comprehension_parts("map", receiver, &args, false) {
        Ok(parts) => parts,
        Err(msg) => return MacroExpansion::Error(msg),
    };

    let mut args = args.into_iter().skip(1);
    let (filter_cond, transform) = if filtered {
        let f = args.next().unwrap();
        let t = args.next().unwrap();
        (Some(f), t)
    } else {
        (None, args.next().unwrap())
    };

    let accu_init = synthetic(ctx, Expr::List(vec![]), span.clone());
    let loop_condition = synthetic(ctx, Expr::Bool(true), span.clone());

    let transformed_list = synthetic(
        ctx,
        Expr::List(vec![ListElement {
            expr: transform,
            optional: false,
        }]),
        span.clone(),
    );
    let step_accu = accu_ref(ctx, &span);
    let append_step = synthetic(
        ctx,
        Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(step_accu),
            right: Box::new(transformed_list),
        },
        span.clone(),
    );

    let loop_step = if let Some(filter) = filter_cond {
        let keep_accu = accu_ref(ctx, &span);
        synthetic(
            ctx,
            Expr::Ternary {
                cond: Box::new(filter),
                then_expr: Box::new(append_step),
                else_expr: Box::new(keep_accu),
            },
            span.clone(),
        )
    } else {
        append_step
    };

    let result = accu_ref(ctx, &span);

    MacroExpansion::Expanded(Spanned::new(
        ctx.next_id(),
        Expr::Comprehension {
            iter_var,
            iter_var2: String::new(),
            iter_range: Box::new(receiver),
            accu_var: ACCU_VAR.to_string(),
            accu_init: Box::new(accu_init),
            loop_condition: Box::new(loop_condition),
            loop_step: Box::new(loop_step),
            result: Box::new(result),
        },
        span,
    ))
}

// === filter() Macro ===

/// `x.filter(v, P)` appends `v` where `P` holds.
fn expand_filter(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    let (receiver, iter_var, _) = match comprehension_parts("filter", receiver, &args, false) {
        Ok(parts) => parts,
        Err(msg) => return MacroExpansion::Error(msg),
    };
    let cond = args.into_iter().last().unwrap();

    let accu_init = synthetic(ctx, Expr::List(vec![]), span.clone());
    let loop_condition = synthetic(ctx, Expr::Bool(true), span.clone());

    let iter_ref = synthetic(ctx, Expr::Ident(iter_var.clone()), span.clone());
    let element_list = synthetic(
        ctx,
        Expr::List(vec![ListElement {
            expr: iter_ref,
            optional: false,
        }]),
        span.clone(),
    );

    let step_accu = accu_ref(ctx, &span);
    let append_step = synthetic(
        ctx,
        Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(step_accu),
            right: Box::new(element_list),
        },
        span.clone(),
    );

    let keep_accu = accu_ref(ctx, &span);
    let loop_step = synthetic(
        ctx,
        Expr::Ternary {
            cond: Box::new(cond),
            then_expr: Box::new(append_step),
            else_expr: Box::new(keep_accu),
        },
        span.clone(),
    );

    let result = accu_ref(ctx, &span);

    MacroExpansion::Expanded(Spanned::new(
        ctx.next_id(),
        Expr::Comprehension {
            iter_var,
            iter_var2: String::new(),
            iter_range: Box::new(receiver),
            accu_var: ACCU_VAR.to_string(),
            accu_init: Box::new(accu_init),
            loop_condition: Box::new(loop_condition),
            loop_step: Box::new(loop_step),
            result: Box::new(result),
        },
        span,
    ))
}

// === optMap() / optFlatMap() Macros ===

fn expand_opt_map(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    expand_opt_impl(ctx, span, receiver, args, true)
}

fn expand_opt_flat_map(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
) -> MacroExpansion {
    expand_opt_impl(ctx, span, receiver, args, false)
}

/// `o.optMap(v, E)` expands to
///
/// ```text
/// bind(@optional_target, o,
///   @optional_target.hasValue()
///     ? optional.of(bind(v, @optional_target.value(), E))
///     : optional.none())
/// ```
///
/// `optFlatMap` is identical minus the `optional.of` wrapper (E must itself
/// produce an optional).
fn expand_opt_impl(
    ctx: &mut MacroContext,
    span: Span,
    receiver: Option<SpannedExpr>,
    args: Vec<SpannedExpr>,
    wrap: bool,
) -> MacroExpansion {
    let name = if wrap { "optMap" } else { "optFlatMap" };
    let receiver = match receiver {
        Some(r) => r,
        None => return MacroExpansion::Error(format!("{}() requires a receiver", name)),
    };
    let var_name = match extract_iter_var(&args[0]) {
        Ok(v) => v,
        Err(msg) => return MacroExpansion::Error(msg),
    };
    let body = args.into_iter().last().unwrap();

    let target_ref = |ctx: &mut MacroContext| {
        synthetic(ctx, Expr::Ident(OPT_RECEIVER_VAR.to_string()), span.clone())
    };
    let member_call = |ctx: &mut MacroContext, method: &str| {
        let target = target_ref(ctx);
        let callee = synthetic(
            ctx,
            Expr::Member {
                expr: Box::new(target),
                field: method.to_string(),
                optional: false,
            },
            span.clone(),
        );
        synthetic(
            ctx,
            Expr::Call {
                expr: Box::new(callee),
                args: vec![],
            },
            span.clone(),
        )
    };
    let namespaced_call = |ctx: &mut MacroContext, method: &str, args: Vec<SpannedExpr>| {
        let ns = synthetic(ctx, Expr::Ident("optional".to_string()), span.clone());
        let callee = synthetic(
            ctx,
            Expr::Member {
                expr: Box::new(ns),
                field: method.to_string(),
                optional: false,
            },
            span.clone(),
        );
        synthetic(
            ctx,
            Expr::Call {
                expr: Box::new(callee),
                args,
            },
            span.clone(),
        )
    };

    let has_value = member_call(ctx, "hasValue");
    let value = member_call(ctx, "value");

    let bound_body = synthetic(
        ctx,
        Expr::Bind {
            var_name,
            init: Box::new(value),
            body: Box::new(body),
        },
        span.clone(),
    );

    let then_expr = if wrap {
        namespaced_call(ctx, "of", vec![bound_body])
    } else {
        bound_body
    };
    let else_expr = namespaced_call(ctx, "none", vec![]);

    let ternary = synthetic(
        ctx,
        Expr::Ternary {
            cond: Box::new(has_value),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        },
        span.clone(),
    );

    MacroExpansion::Expanded(Spanned::new(
        ctx.next_id(),
        Expr::Bind {
            var_name: OPT_RECEIVER_VAR.to_string(),
            init: Box::new(receiver),
            body: Box::new(ternary),
        },
        span,
    ))
}
