//! CEL Abstract Syntax Tree definitions.

/// Source span for error reporting.
/// Uses byte offsets into the source string.
pub type Span = std::ops::Range<usize>;

/// AST node with source location and unique ID.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    /// Unique identifier for this node (1-indexed, assigned during parsing)
    pub id: i64,
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(id: i64, node: T, span: Span) -> Self {
        Self { id, node, span }
    }
}

/// A spanned expression.
pub type SpannedExpr = Spanned<Expr>;

/// A list element that may be optional (`[?e]`).
#[derive(Debug, Clone, PartialEq)]
pub struct ListElement {
    pub expr: SpannedExpr,
    pub optional: bool,
}

/// A map entry that may be optional (`{?k: v}`).
#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    pub key: SpannedExpr,
    pub value: SpannedExpr,
    pub optional: bool,
}

/// A struct field that may be optional (`T{?f: v}`).
#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub value: SpannedExpr,
    pub optional: bool,
}

/// CEL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // Literals
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),

    // Identifiers
    Ident(String),
    /// Root-scoped identifier (`.name`) - resolves in root scope only
    RootIdent(String),

    // Collections
    List(Vec<ListElement>),
    Map(Vec<MapEntry>),

    // Operations
    Unary {
        op: UnaryOp,
        expr: Box<SpannedExpr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<SpannedExpr>,
        right: Box<SpannedExpr>,
    },
    Ternary {
        cond: Box<SpannedExpr>,
        then_expr: Box<SpannedExpr>,
        else_expr: Box<SpannedExpr>,
    },

    // Access
    Member {
        expr: Box<SpannedExpr>,
        field: String,
        /// `e.?f` - optional select, propagates optional.none()
        optional: bool,
    },
    Index {
        expr: Box<SpannedExpr>,
        index: Box<SpannedExpr>,
        /// `e[?k]` - optional index
        optional: bool,
    },
    Call {
        expr: Box<SpannedExpr>,
        args: Vec<SpannedExpr>,
    },
    /// Struct literal: TypeName{field: value, ...}
    /// The type name is the flattened identifier chain before the braces;
    /// a leading `.` marks a root-scoped name.
    Struct {
        type_name: String,
        fields: Vec<StructField>,
    },

    /// Comprehension expression (result of macro expansion).
    ///
    /// Represents the expansion of macros like `all`, `exists`, `exists_one`,
    /// `map`, `filter`. These are created during macro expansion, not directly
    /// from parsing.
    ///
    /// Semantics:
    /// ```text
    /// let accu_var = accu_init
    /// for (let iter_var, iter_var2 in iter_range) {
    ///    if (!loop_condition) { break }
    ///    accu_var = loop_step
    /// }
    /// return result
    /// ```
    Comprehension {
        /// The name of the first iteration variable.
        iter_var: String,
        /// The name of the second iteration variable (for two-variable macros),
        /// empty if not set. When present, `iter_var` binds the index/key and
        /// `iter_var2` the element/value.
        iter_var2: String,
        /// The range over which the comprehension iterates.
        iter_range: Box<SpannedExpr>,
        /// The name of the accumulator variable.
        accu_var: String,
        /// The initial value of the accumulator.
        accu_init: Box<SpannedExpr>,
        /// Returns false when the result has been computed (short-circuit condition).
        loop_condition: Box<SpannedExpr>,
        /// Computes the next value of the accumulator.
        loop_step: Box<SpannedExpr>,
        /// Computes the final result from the accumulator.
        result: Box<SpannedExpr>,
    },

    /// Member test expression (result of `has(m.x)` macro expansion).
    ///
    /// Tests for presence of a field without accessing its value.
    MemberTestOnly {
        expr: Box<SpannedExpr>,
        field: String,
    },

    /// Evaluate-once local binding, used by macro expansions that would
    /// otherwise duplicate their receiver (e.g. `optMap`).
    Bind {
        var_name: String,
        init: Box<SpannedExpr>,
        body: Box<SpannedExpr>,
    },
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation (`-`)
    Neg,
    /// Logical negation (`!`)
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Membership
    In,

    // Logical
    And,
    Or,
}
