//! Tree-walking interpreter over the compiled IR.
//!
//! Evaluation returns a `Value` for every node; contract violations travel
//! as the error sentinel. Ordering follows the IR's structure: call
//! arguments left-to-right, comprehension ranges in iteration order, both
//! sides of `&&`/`||` eagerly, exactly one ternary branch.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::ir::{ArithOp, CallTarget, CmpOp, Ir, ResolveNode, Strictness};

use super::structs;
use super::time;
use super::{
    Bindings, Duration, EvalError, FunctionRegistry, MapKey, OptionalValue, Scope, Timestamp,
    TypeValue, Value, ValueMap,
};

/// The IR interpreter.
///
/// Holds only borrowed, immutable state; all per-call scratch lives in
/// lexical [`Scope`]s, so one interpreter per evaluate is safe to run on
/// any thread.
pub struct Interpreter<'a> {
    bindings: &'a dyn Bindings,
    functions: &'a FunctionRegistry,
}

impl<'a> Interpreter<'a> {
    pub fn new(bindings: &'a dyn Bindings, functions: &'a FunctionRegistry) -> Self {
        Self {
            bindings,
            functions,
        }
    }

    fn nested<'b>(&self, scope: &'b dyn Bindings) -> Interpreter<'b>
    where
        'a: 'b,
    {
        Interpreter {
            bindings: scope,
            functions: self.functions,
        }
    }

    pub fn eval(&self, ir: &Ir) -> Value {
        match ir {
            Ir::ConstNull => Value::Null,
            Ir::ConstBool(b) => Value::Bool(*b),
            Ir::ConstInt(i) => Value::Int(*i),
            Ir::ConstUInt(u) => Value::UInt(*u),
            Ir::ConstDouble(d) => Value::Double(*d),
            Ir::ConstString(s) => Value::String(s.clone()),
            Ir::ConstBytes(b) => Value::Bytes(b.clone()),

            Ir::Local(name) => self
                .bindings
                .resolve(name)
                .unwrap_or_else(|| Value::error(EvalError::internal(format!(
                    "unbound comprehension variable: {}",
                    name
                )))),

            Ir::Resolve(node) => self.eval_resolve(node),

            Ir::Select {
                operand,
                field,
                optional,
            } => self.eval_select(operand, field, *optional),

            Ir::TestSelect {
                operand,
                field,
                direct_paths,
            } => self.eval_test_select(operand, field, direct_paths),

            Ir::Index {
                operand,
                index,
                optional,
            } => self.eval_index(operand, index, *optional),

            Ir::Arith {
                op,
                strictness,
                left,
                right,
            } => {
                let l = self.eval(left);
                if l.is_error() {
                    return l;
                }
                let r = self.eval(right);
                if r.is_error() {
                    return r;
                }
                eval_arith(*op, *strictness, l, r)
            }

            Ir::Compare { op, left, right } => {
                let l = self.eval(left);
                if l.is_error() {
                    return l;
                }
                let r = self.eval(right);
                if r.is_error() {
                    return r;
                }
                eval_compare(*op, &l, &r)
            }

            Ir::Equal {
                negated,
                strictness,
                left,
                right,
            } => {
                let l = self.eval(left);
                if l.is_error() {
                    return l;
                }
                let r = self.eval(right);
                if r.is_error() {
                    return r;
                }
                eval_equal(*negated, *strictness, &l, &r)
            }

            Ir::In { left, right } => {
                let l = self.eval(left);
                if l.is_error() {
                    return l;
                }
                let r = self.eval(right);
                if r.is_error() {
                    return r;
                }
                eval_in(&l, &r)
            }

            Ir::Negate(inner) => {
                let v = self.eval(inner);
                if v.is_error() {
                    return v;
                }
                match v {
                    Value::Int(i) => i.checked_neg().map(Value::Int).unwrap_or_else(|| {
                        Value::error(EvalError::overflow("integer negation overflow"))
                    }),
                    Value::Double(d) => Value::Double(-d),
                    other => Value::error(EvalError::type_mismatch(
                        "int or double",
                        &other.type_name(),
                    )),
                }
            }

            Ir::Not(inner) => {
                let v = self.eval(inner);
                if v.is_error() {
                    return v;
                }
                match v {
                    Value::Bool(b) => Value::Bool(!b),
                    other => Value::error(EvalError::type_mismatch("bool", &other.type_name())),
                }
            }

            Ir::NotStrictlyFalse(inner) => match self.eval(inner) {
                Value::Bool(false) => Value::Bool(false),
                _ => Value::Bool(true),
            },

            Ir::And { left, right, .. } => {
                // Both sides always evaluate; no short-circuit. Decisive
                // false wins over errors from either side.
                let l = logical_operand(self.eval(left));
                let r = logical_operand(self.eval(right));
                if l == Value::Bool(false) || r == Value::Bool(false) {
                    return Value::Bool(false);
                }
                if l.is_error() {
                    return l;
                }
                if r.is_error() {
                    return r;
                }
                Value::Bool(true)
            }

            Ir::Or { left, right, .. } => {
                let l = logical_operand(self.eval(left));
                let r = logical_operand(self.eval(right));
                if l == Value::Bool(true) || r == Value::Bool(true) {
                    return Value::Bool(true);
                }
                if l.is_error() {
                    return l;
                }
                if r.is_error() {
                    return r;
                }
                Value::Bool(false)
            }

            Ir::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                // The one lazy construct: only the selected branch evaluates
                match self.eval(cond) {
                    Value::Bool(true) => self.eval(then_branch),
                    Value::Bool(false) => self.eval(else_branch),
                    Value::Error(e) => Value::Error(e),
                    other => {
                        Value::error(EvalError::type_mismatch("bool", &other.type_name()))
                    }
                }
            }

            Ir::List(elements) => self.eval_list(elements),
            Ir::Map(entries) => self.eval_map(entries),
            Ir::Struct { type_name, fields } => self.eval_struct(type_name, fields),

            Ir::Call { target, args } => self.eval_call(target, args),

            Ir::Comprehension {
                iter_var,
                iter_var2,
                iter_range,
                accu_var,
                accu_init,
                loop_condition,
                loop_step,
                result,
            } => self.eval_comprehension(
                iter_var,
                iter_var2,
                iter_range,
                accu_var,
                accu_init,
                loop_condition,
                loop_step,
                result,
            ),

            Ir::FilterFast {
                iter_var,
                iter_range,
                predicate,
            } => self.eval_filter_fast(iter_var, iter_range, predicate),

            Ir::Bind {
                var_name,
                init,
                body,
            } => {
                let init_val = self.eval(init);
                if init_val.is_error() {
                    return init_val;
                }
                let scope = Scope::new(self.bindings).with_binding(var_name.clone(), init_val);
                self.nested(&scope).eval(body)
            }
        }
    }

    /// Longest-prefix resolution: the first candidate whose key is bound
    /// wins, then the remaining fields select into the bound value.
    fn eval_resolve(&self, node: &ResolveNode) -> Value {
        for candidate in &node.candidates {
            if !self.bindings.has(&candidate.key) {
                continue;
            }
            let mut value = match self.bindings.resolve(&candidate.key) {
                Some(v) => v,
                None => continue,
            };
            for field in &candidate.fields {
                value = select_field(&value, field, false);
                if value.is_error() {
                    return value;
                }
            }
            return value;
        }

        if let Some(t) = type_constant(&node.display) {
            return Value::Type(t);
        }

        Value::error(EvalError::unknown_identifier(&node.display))
    }

    fn eval_select(&self, operand: &Ir, field: &str, optional: bool) -> Value {
        let value = self.eval(operand);
        if value.is_error() {
            return value;
        }

        if optional {
            // Optional select propagates absence through chained access
            if let Value::Optional(opt) = &value {
                return match opt {
                    OptionalValue::None => Value::optional_none(),
                    OptionalValue::Some(inner) => select_field(inner, field, true),
                };
            }
        }

        select_field(&value, field, optional)
    }

    fn eval_test_select(&self, operand: &Ir, field: &str, direct_paths: &[String]) -> Value {
        // A fully-qualified binding satisfies the test without touching
        // the operand (longest-prefix rule applies to has() too).
        for path in direct_paths {
            if self.bindings.has(path) {
                return Value::Bool(true);
            }
        }

        // has() absorbs errors: an unresolvable prefix is "absent"
        let value = self.eval(operand);
        match &value {
            Value::Error(_) => Value::Bool(false),
            Value::Map(map) => Value::Bool(map.contains_key(&MapKey::String(Arc::from(field)))),
            Value::Struct(s) => Value::Bool(s.has_field(field)),
            _ => Value::Bool(false),
        }
    }

    fn eval_index(&self, operand: &Ir, index: &Ir, optional: bool) -> Value {
        let value = self.eval(operand);
        if value.is_error() {
            return value;
        }

        let index_val = self.eval(index);
        if index_val.is_error() {
            return index_val;
        }

        if optional {
            if let Value::Optional(opt) = &value {
                return match opt {
                    OptionalValue::None => Value::optional_none(),
                    OptionalValue::Some(inner) => access_index(inner, &index_val, true),
                };
            }
        }

        access_index(&value, &index_val, optional)
    }

    fn eval_list(&self, elements: &[crate::ir::ListElementIr]) -> Value {
        let mut values = Vec::with_capacity(elements.len());

        for elem in elements {
            let value = self.eval(&elem.value);
            if value.is_error() {
                return value;
            }

            if elem.optional {
                // Optional list element: absent optionals are omitted
                match value {
                    Value::Optional(OptionalValue::Some(v)) => values.push(*v),
                    Value::Optional(OptionalValue::None) => {}
                    other => values.push(other),
                }
            } else {
                values.push(value);
            }
        }

        Value::List(Arc::from(values))
    }

    fn eval_map(&self, entries: &[crate::ir::MapEntryIr]) -> Value {
        let mut map = ValueMap::new();

        for entry in entries {
            let key = self.eval(&entry.key);
            if key.is_error() {
                return key;
            }

            let value = self.eval(&entry.value);
            if value.is_error() {
                return value;
            }

            let value = if entry.optional {
                match value {
                    Value::Optional(OptionalValue::Some(v)) => *v,
                    Value::Optional(OptionalValue::None) => continue,
                    other => other,
                }
            } else {
                value
            };

            let map_key = match MapKey::from_value(&key) {
                Some(k) => k,
                None => {
                    return Value::error(EvalError::type_mismatch(
                        "valid map key (bool, int, uint, or string)",
                        &key.type_name(),
                    ))
                }
            };

            // Duplicate keys are invalid under deep equality, so an int
            // key collides with an equal uint key
            if map.contains_value_key(&key) {
                return Value::error(EvalError::invalid_argument(format!(
                    "duplicate map key: {}",
                    key
                )));
            }

            map.insert(map_key, value);
        }

        Value::Map(Arc::new(map))
    }

    fn eval_struct(&self, type_name: &str, fields: &[crate::ir::FieldIr]) -> Value {
        let mut evaluated = Vec::with_capacity(fields.len());

        for field in fields {
            let value = self.eval(&field.value);
            if value.is_error() {
                return value;
            }

            if field.optional {
                match value {
                    Value::Optional(OptionalValue::Some(v)) => {
                        evaluated.push((field.name.clone(), *v))
                    }
                    Value::Optional(OptionalValue::None) => {}
                    other => evaluated.push((field.name.clone(), other)),
                }
            } else {
                evaluated.push((field.name.clone(), value));
            }
        }

        structs::construct(type_name, evaluated)
    }

    fn eval_call(&self, target: &CallTarget, args: &[Ir]) -> Value {
        let mut arg_values = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval(arg);
            if value.is_error() {
                return value;
            }
            arg_values.push(value);
        }

        let (name, is_member) = match target {
            CallTarget::Global(name) => (name.as_str(), false),
            CallTarget::Member(name) => (name.as_str(), true),
        };

        if !is_member && arg_values.len() == 1 {
            if let Some(converted) = try_conversion(name, &arg_values[0]) {
                return converted;
            }
        }

        let overloads = self.functions.find(name, arg_values.len(), is_member);
        if overloads.is_empty() {
            return Value::error(EvalError::unknown_function(name));
        }

        // Dynamically typed dispatch: try overloads in order, first
        // non-error result wins
        for overload in &overloads[..overloads.len() - 1] {
            let result = overload.call(&arg_values);
            if !result.is_error() {
                return result;
            }
        }
        overloads[overloads.len() - 1].call(&arg_values)
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_comprehension(
        &self,
        iter_var: &str,
        iter_var2: &str,
        iter_range: &Ir,
        accu_var: &str,
        accu_init: &Ir,
        loop_condition: &Ir,
        loop_step: &Ir,
        result: &Ir,
    ) -> Value {
        let range_val = self.eval(iter_range);
        if range_val.is_error() {
            return range_val;
        }

        let mut accu = self.eval(accu_init);
        if accu.is_error() {
            return accu;
        }

        // Single-variable: the element for lists, the key for maps.
        // Two-variable: (index, element) for lists, (key, value) for maps.
        let entries: Vec<(Value, Value)> = match &range_val {
            Value::List(list) => list
                .iter()
                .enumerate()
                .map(|(i, elem)| {
                    if iter_var2.is_empty() {
                        (elem.clone(), Value::Null)
                    } else {
                        (Value::Int(i as i64), elem.clone())
                    }
                })
                .collect(),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| {
                    if iter_var2.is_empty() {
                        (k.to_value(), Value::Null)
                    } else {
                        (k.to_value(), v.clone())
                    }
                })
                .collect(),
            other => {
                return Value::error(EvalError::type_mismatch(
                    "list or map",
                    &other.type_name(),
                ))
            }
        };

        for (first, second) in entries {
            let mut scope = Scope::new(self.bindings).with_binding(accu_var, accu.clone());
            scope.insert(iter_var, first);
            if !iter_var2.is_empty() {
                scope.insert(iter_var2, second);
            }
            let iter_eval = self.nested(&scope);

            let cond = iter_eval.eval(loop_condition);
            match &cond {
                Value::Bool(false) => break,
                Value::Bool(true) => {}
                Value::Error(_) => return cond,
                other => {
                    return Value::error(EvalError::type_mismatch("bool", &other.type_name()))
                }
            }

            // The step's result is assigned unconditionally: errors are
            // values here, which is what lets `accu && P` absorb a
            // predicate error once a decisive false element arrives
            accu = iter_eval.eval(loop_step);
        }

        let result_scope = Scope::new(self.bindings).with_binding(accu_var, accu);
        self.nested(&result_scope).eval(result)
    }

    /// `filter(v, P)` specialized to a direct loop over the range; errors
    /// in the predicate propagate, matching the general protocol.
    fn eval_filter_fast(&self, iter_var: &str, iter_range: &Ir, predicate: &Ir) -> Value {
        let range_val = self.eval(iter_range);
        if range_val.is_error() {
            return range_val;
        }

        let candidates: Vec<Value> = match &range_val {
            Value::List(list) => list.to_vec(),
            Value::Map(map) => map.keys().map(|k| k.to_value()).collect(),
            other => {
                return Value::error(EvalError::type_mismatch(
                    "list or map",
                    &other.type_name(),
                ))
            }
        };

        let mut kept = Vec::new();
        for candidate in candidates {
            let scope = Scope::new(self.bindings).with_binding(iter_var, candidate.clone());
            match self.nested(&scope).eval(predicate) {
                Value::Bool(true) => kept.push(candidate),
                Value::Bool(false) => {}
                Value::Error(e) => return Value::Error(e),
                other => {
                    return Value::error(EvalError::type_mismatch("bool", &other.type_name()))
                }
            }
        }

        Value::List(Arc::from(kept))
    }
}

/// Normalize a logical operand: booleans and errors pass through, anything
/// else becomes a type-mismatch error (which the cascade may still absorb).
fn logical_operand(v: Value) -> Value {
    match v {
        Value::Bool(_) | Value::Error(_) => v,
        other => Value::error(EvalError::type_mismatch("bool", &other.type_name())),
    }
}

/// Builtin type constants available as identifiers.
fn type_constant(name: &str) -> Option<TypeValue> {
    match name {
        "null_type" => Some(TypeValue::null_type()),
        "bool" => Some(TypeValue::bool_type()),
        "int" => Some(TypeValue::int_type()),
        "uint" => Some(TypeValue::uint_type()),
        "double" => Some(TypeValue::double_type()),
        "string" => Some(TypeValue::string_type()),
        "bytes" => Some(TypeValue::bytes_type()),
        "list" => Some(TypeValue::list_type()),
        "map" => Some(TypeValue::map_type()),
        "type" => Some(TypeValue::type_type()),
        _ => None,
    }
}

/// Field select on an evaluated operand (`m.f` on maps, structs).
pub(crate) fn select_field(value: &Value, field: &str, optional: bool) -> Value {
    match value {
        Value::Map(map) => {
            let key = MapKey::String(Arc::from(field));
            match map.get(&key) {
                Some(v) => {
                    if optional {
                        Value::optional_some(v.clone())
                    } else {
                        v.clone()
                    }
                }
                None => {
                    if optional {
                        Value::optional_none()
                    } else {
                        Value::error(EvalError::key_not_found(field))
                    }
                }
            }
        }
        Value::Struct(s) => {
            if optional {
                match s.get(field) {
                    Some(v) => Value::optional_some(v.clone()),
                    None => Value::optional_none(),
                }
            } else {
                s.field_or_default(field)
            }
        }
        other => {
            if optional {
                Value::optional_none()
            } else {
                Value::error(EvalError::type_mismatch("map or struct", &other.type_name()))
            }
        }
    }
}

/// Index access on lists and maps.
fn access_index(value: &Value, index: &Value, optional: bool) -> Value {
    match value {
        Value::List(list) => {
            let idx = match list_index(index) {
                Ok(i) => i,
                Err(e) => return Value::error(e),
            };
            if idx < 0 || idx >= list.len() as i64 {
                if optional {
                    Value::optional_none()
                } else {
                    Value::error(EvalError::index_out_of_bounds(idx, list.len()))
                }
            } else {
                let result = list[idx as usize].clone();
                if optional {
                    Value::optional_some(result)
                } else {
                    result
                }
            }
        }
        Value::Map(map) => match map.lookup_value(index) {
            Some(v) => {
                if optional {
                    Value::optional_some(v.clone())
                } else {
                    v.clone()
                }
            }
            None => {
                if optional {
                    Value::optional_none()
                } else {
                    Value::error(EvalError::key_not_found(&format!("{}", index)))
                }
            }
        },
        other => {
            if optional {
                Value::optional_none()
            } else {
                Value::error(EvalError::type_mismatch("list or map", &other.type_name()))
            }
        }
    }
}

/// List indices accept int, uint, and whole-number doubles. No negative
/// wraparound: negative indices are out of range.
fn list_index(index: &Value) -> Result<i64, EvalError> {
    match index {
        Value::Int(i) => Ok(*i),
        Value::UInt(u) => {
            if *u > i64::MAX as u64 {
                Err(EvalError::index_out_of_bounds(i64::MAX, 0))
            } else {
                Ok(*u as i64)
            }
        }
        Value::Double(d) => {
            if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d < i64::MAX as f64 {
                Ok(*d as i64)
            } else {
                Err(EvalError::invalid_argument(format!(
                    "invalid list index: {}",
                    d
                )))
            }
        }
        other => Err(EvalError::type_mismatch("int", &other.type_name())),
    }
}

fn eval_arith(op: ArithOp, strictness: Strictness, left: Value, right: Value) -> Value {
    // Mixed numeric tags only combine when dyn() relaxed the operation
    if strictness == Strictness::Relaxed
        && left.is_numeric()
        && right.is_numeric()
        && std::mem::discriminant(&left) != std::mem::discriminant(&right)
    {
        return eval_arith_promoted(op, &left, &right);
    }

    match op {
        ArithOp::Add => eval_add(left, right),
        ArithOp::Sub => eval_sub(left, right),
        ArithOp::Mul => eval_mul(left, right),
        ArithOp::Div => eval_div(left, right),
        ArithOp::Mod => eval_mod(left, right),
    }
}

/// Mixed-type arithmetic under dyn(): with a double operand both sides
/// promote to double; int/uint pairs compute in i128 and narrow to int,
/// then uint.
fn eval_arith_promoted(op: ArithOp, left: &Value, right: &Value) -> Value {
    let as_double = |v: &Value| match v {
        Value::Int(i) => *i as f64,
        Value::UInt(u) => *u as f64,
        Value::Double(d) => *d,
        _ => unreachable!("checked numeric"),
    };

    if matches!(left, Value::Double(_)) || matches!(right, Value::Double(_)) {
        let l = as_double(left);
        let r = as_double(right);
        return match op {
            ArithOp::Add => Value::Double(l + r),
            ArithOp::Sub => Value::Double(l - r),
            ArithOp::Mul => Value::Double(l * r),
            ArithOp::Div => Value::Double(l / r),
            ArithOp::Mod => Value::error(EvalError::no_matching_overload("_%_")),
        };
    }

    let as_wide = |v: &Value| match v {
        Value::Int(i) => *i as i128,
        Value::UInt(u) => *u as i128,
        _ => unreachable!("checked numeric"),
    };
    let l = as_wide(left);
    let r = as_wide(right);

    let wide = match op {
        ArithOp::Add => l + r,
        ArithOp::Sub => l - r,
        ArithOp::Mul => l * r,
        ArithOp::Div => {
            if r == 0 {
                return Value::error(EvalError::division_by_zero());
            }
            l / r
        }
        ArithOp::Mod => {
            if r == 0 {
                return Value::error(EvalError::modulo_by_zero());
            }
            l % r
        }
    };

    if let Ok(i) = i64::try_from(wide) {
        Value::Int(i)
    } else if let Ok(u) = u64::try_from(wide) {
        Value::UInt(u)
    } else {
        Value::error(EvalError::overflow(format!(
            "{} overflow",
            op.token()
        )))
    }
}

fn eval_add(left: Value, right: Value) -> Value {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(*b)
            .map(Value::Int)
            .unwrap_or_else(|| Value::error(EvalError::overflow("integer addition overflow"))),
        (Value::UInt(a), Value::UInt(b)) => a
            .checked_add(*b)
            .map(Value::UInt)
            .unwrap_or_else(|| Value::error(EvalError::overflow("unsigned addition overflow"))),
        (Value::Double(a), Value::Double(b)) => Value::Double(a + b),
        (Value::String(a), Value::String(b)) => {
            let mut result = String::with_capacity(a.len() + b.len());
            result.push_str(a);
            result.push_str(b);
            Value::String(Arc::from(result))
        }
        (Value::Bytes(a), Value::Bytes(b)) => {
            let mut result = Vec::with_capacity(a.len() + b.len());
            result.extend_from_slice(a);
            result.extend_from_slice(b);
            Value::Bytes(Arc::from(result))
        }
        (Value::List(a), Value::List(b)) => {
            let mut result = Vec::with_capacity(a.len() + b.len());
            result.extend(a.iter().cloned());
            result.extend(b.iter().cloned());
            Value::List(Arc::from(result))
        }
        (Value::Timestamp(t), Value::Duration(d)) | (Value::Duration(d), Value::Timestamp(t)) => {
            timestamp_plus_nanos(*t, d.seconds, d.nanos as i64)
        }
        (Value::Duration(a), Value::Duration(b)) => {
            duration_sum(a.seconds, a.nanos as i64, b.seconds, b.nanos as i64)
        }
        _ => Value::error(EvalError::no_matching_overload("_+_")),
    }
}

fn eval_sub(left: Value, right: Value) -> Value {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_sub(*b)
            .map(Value::Int)
            .unwrap_or_else(|| Value::error(EvalError::overflow("integer subtraction overflow"))),
        (Value::UInt(a), Value::UInt(b)) => a
            .checked_sub(*b)
            .map(Value::UInt)
            .unwrap_or_else(|| Value::error(EvalError::overflow("unsigned subtraction underflow"))),
        (Value::Double(a), Value::Double(b)) => Value::Double(a - b),
        (Value::Timestamp(a), Value::Timestamp(b)) => duration_sum(
            a.seconds,
            a.nanos as i64,
            -b.seconds,
            -(b.nanos as i64),
        ),
        (Value::Timestamp(t), Value::Duration(d)) => {
            timestamp_plus_nanos(*t, -d.seconds, -(d.nanos as i64))
        }
        (Value::Duration(a), Value::Duration(b)) => {
            duration_sum(a.seconds, a.nanos as i64, -b.seconds, -(b.nanos as i64))
        }
        _ => Value::error(EvalError::no_matching_overload("_-_")),
    }
}

fn eval_mul(left: Value, right: Value) -> Value {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_mul(*b)
            .map(Value::Int)
            .unwrap_or_else(|| Value::error(EvalError::overflow("integer multiplication overflow"))),
        (Value::UInt(a), Value::UInt(b)) => a
            .checked_mul(*b)
            .map(Value::UInt)
            .unwrap_or_else(|| Value::error(EvalError::overflow("unsigned multiplication overflow"))),
        (Value::Double(a), Value::Double(b)) => Value::Double(a * b),
        _ => Value::error(EvalError::no_matching_overload("_*_")),
    }
}

fn eval_div(left: Value, right: Value) -> Value {
    match (&left, &right) {
        (Value::Int(_), Value::Int(0)) => Value::error(EvalError::division_by_zero()),
        // int-min / -1 overflows rather than wrapping
        (Value::Int(a), Value::Int(b)) => a
            .checked_div(*b)
            .map(Value::Int)
            .unwrap_or_else(|| Value::error(EvalError::overflow("integer division overflow"))),
        (Value::UInt(_), Value::UInt(0)) => Value::error(EvalError::division_by_zero()),
        (Value::UInt(a), Value::UInt(b)) => Value::UInt(a / b),
        // Double division by zero follows IEEE-754
        (Value::Double(a), Value::Double(b)) => Value::Double(a / b),
        _ => Value::error(EvalError::no_matching_overload("_/_")),
    }
}

fn eval_mod(left: Value, right: Value) -> Value {
    match (&left, &right) {
        (Value::Int(_), Value::Int(0)) => Value::error(EvalError::modulo_by_zero()),
        (Value::Int(a), Value::Int(b)) => a
            .checked_rem(*b)
            .map(Value::Int)
            .unwrap_or_else(|| Value::error(EvalError::overflow("integer modulo overflow"))),
        (Value::UInt(_), Value::UInt(0)) => Value::error(EvalError::modulo_by_zero()),
        (Value::UInt(a), Value::UInt(b)) => Value::UInt(a % b),
        _ => Value::error(EvalError::no_matching_overload("_%_")),
    }
}

/// timestamp + (seconds, nanos), range-checked.
fn timestamp_plus_nanos(t: Timestamp, seconds: i64, nanos: i64) -> Value {
    let total_nanos = t.nanos as i64 + nanos;
    let (extra_secs, norm_nanos) = normalize_timestamp_nanos(total_nanos);

    match t
        .seconds
        .checked_add(seconds)
        .and_then(|s| s.checked_add(extra_secs))
    {
        Some(result_seconds) => {
            let ts = Timestamp::new(result_seconds, norm_nanos);
            if ts.is_valid() {
                Value::Timestamp(ts)
            } else {
                Value::error(EvalError::range_error(
                    "timestamp out of range: must be between year 0001 and 9999",
                ))
            }
        }
        None => Value::error(EvalError::overflow("timestamp arithmetic overflow")),
    }
}

/// Sum of two (seconds, nanos) pairs as a duration, range-checked.
fn duration_sum(s1: i64, n1: i64, s2: i64, n2: i64) -> Value {
    let seconds = match s1.checked_add(s2) {
        Some(s) => s,
        None => return Value::error(EvalError::overflow("duration arithmetic overflow")),
    };
    match Duration::normalized(seconds, n1 + n2) {
        Some(d) => Value::Duration(d),
        None => Value::error(EvalError::range_error(
            "duration out of range: total nanoseconds must fit in int64",
        )),
    }
}

/// Normalize nanoseconds into 0..999_999_999 for timestamps.
/// Returns (extra_seconds, normalized_nanos).
fn normalize_timestamp_nanos(nanos: i64) -> (i64, i32) {
    let extra = nanos.div_euclid(1_000_000_000);
    let rem = nanos.rem_euclid(1_000_000_000);
    (extra, rem as i32)
}

fn eval_compare(op: CmpOp, left: &Value, right: &Value) -> Value {
    match left.compare(right) {
        Some(ordering) => {
            let holds = match op {
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::Le => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                CmpOp::Ge => ordering != Ordering::Less,
            };
            Value::Bool(holds)
        }
        None => {
            // NaN comparisons are false, never errors
            if left.is_numeric() && right.is_numeric() {
                Value::Bool(false)
            } else {
                Value::error(EvalError::no_matching_overload(op.token()))
            }
        }
    }
}

fn eval_equal(negated: bool, strictness: Strictness, left: &Value, right: &Value) -> Value {
    // Strict equality: mixed numeric tags error unless dyn()-relaxed
    if strictness == Strictness::Strict
        && left.is_numeric()
        && right.is_numeric()
        && std::mem::discriminant(left) != std::mem::discriminant(right)
    {
        return Value::error(EvalError::no_matching_overload(if negated {
            "_!=_"
        } else {
            "_==_"
        }));
    }

    let equal = left == right;
    Value::Bool(equal != negated)
}

fn eval_in(left: &Value, right: &Value) -> Value {
    match right {
        Value::List(list) => Value::Bool(list.iter().any(|elem| left == elem)),
        Value::Map(map) => Value::Bool(map.contains_value_key(left)),
        other => Value::error(EvalError::type_mismatch("list or map", &other.type_name())),
    }
}

// ==================== Type Conversions ====================

/// Explicit conversion functions. Returns None when `name` is not a
/// conversion, letting registry dispatch proceed.
fn try_conversion(name: &str, arg: &Value) -> Option<Value> {
    match name {
        "int" => Some(convert_to_int(arg)),
        "uint" => Some(convert_to_uint(arg)),
        "double" => Some(convert_to_double(arg)),
        "string" => Some(convert_to_string(arg)),
        "bool" => Some(convert_to_bool(arg)),
        "bytes" => Some(convert_to_bytes(arg)),
        "timestamp" => Some(convert_to_timestamp(arg)),
        "duration" => Some(convert_to_duration(arg)),
        "type" => Some(Value::Type(arg.type_value())),
        _ => None,
    }
}

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

fn convert_to_int(value: &Value) -> Value {
    match value {
        Value::Int(i) => Value::Int(*i),
        Value::UInt(u) => {
            if *u > i64::MAX as u64 {
                Value::error(EvalError::overflow("uint out of int range"))
            } else {
                Value::Int(*u as i64)
            }
        }
        Value::Double(d) => {
            if d.is_nan() || d.is_infinite() || *d >= TWO_POW_63 || *d <= -TWO_POW_63 {
                Value::error(EvalError::overflow("double out of int range"))
            } else {
                // Truncation toward zero
                Value::Int(*d as i64)
            }
        }
        // Signed decimal only: hex, exponents, and fractions are rejected
        Value::String(s) => s
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or_else(|_| Value::error(EvalError::invalid_conversion("string", "int"))),
        Value::Timestamp(t) => Value::Int(t.seconds),
        other => Value::error(EvalError::invalid_conversion(&other.type_name(), "int")),
    }
}

fn convert_to_uint(value: &Value) -> Value {
    match value {
        Value::UInt(u) => Value::UInt(*u),
        Value::Int(i) => {
            if *i < 0 {
                Value::error(EvalError::overflow("negative int out of uint range"))
            } else {
                Value::UInt(*i as u64)
            }
        }
        Value::Double(d) => {
            if d.is_nan() || d.is_infinite() || *d < 0.0 || *d >= TWO_POW_64 {
                Value::error(EvalError::overflow("double out of uint range"))
            } else {
                Value::UInt(*d as u64)
            }
        }
        Value::String(s) => s
            .parse::<u64>()
            .map(Value::UInt)
            .unwrap_or_else(|_| Value::error(EvalError::invalid_conversion("string", "uint"))),
        other => Value::error(EvalError::invalid_conversion(&other.type_name(), "uint")),
    }
}

fn convert_to_double(value: &Value) -> Value {
    match value {
        Value::Double(d) => Value::Double(*d),
        Value::Int(i) => Value::Double(*i as f64),
        Value::UInt(u) => Value::Double(*u as f64),
        Value::String(s) => s
            .parse::<f64>()
            .map(Value::Double)
            .unwrap_or_else(|_| Value::error(EvalError::invalid_conversion("string", "double"))),
        other => Value::error(EvalError::invalid_conversion(&other.type_name(), "double")),
    }
}

fn convert_to_string(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.clone()),
        Value::Int(i) => Value::String(Arc::from(i.to_string())),
        Value::UInt(u) => Value::String(Arc::from(u.to_string())),
        Value::Double(d) => Value::String(Arc::from(format_double(*d))),
        Value::Bool(b) => Value::String(Arc::from(b.to_string())),
        Value::Bytes(b) => match std::str::from_utf8(b) {
            Ok(s) => Value::String(Arc::from(s)),
            Err(_) => Value::error(EvalError::invalid_conversion("bytes", "string")),
        },
        Value::Null => Value::String(Arc::from("null")),
        Value::List(_) | Value::Map(_) => Value::String(Arc::from(value.to_string())),
        Value::Type(t) => Value::String(t.name.clone()),
        Value::Timestamp(t) => Value::String(Arc::from(time::format_timestamp(t))),
        Value::Duration(d) => Value::String(Arc::from(time::format_duration(d))),
        Value::Ip(ip) => Value::String(Arc::from(ip.canonical())),
        Value::Cidr(c) => Value::String(Arc::from(format!("{}/{}", c.ip.canonical(), c.prefix_len))),
        other => Value::error(EvalError::invalid_conversion(&other.type_name(), "string")),
    }
}

fn convert_to_bool(value: &Value) -> Value {
    match value {
        Value::Bool(b) => Value::Bool(*b),
        Value::String(s) => match s.as_ref() {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Value::Bool(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Value::Bool(false),
            _ => Value::error(EvalError::invalid_conversion("string", "bool")),
        },
        other => Value::error(EvalError::invalid_conversion(&other.type_name(), "bool")),
    }
}

fn convert_to_bytes(value: &Value) -> Value {
    match value {
        Value::Bytes(b) => Value::Bytes(b.clone()),
        Value::String(s) => Value::Bytes(Arc::from(s.as_bytes())),
        other => Value::error(EvalError::invalid_conversion(&other.type_name(), "bytes")),
    }
}

fn convert_to_timestamp(value: &Value) -> Value {
    match value {
        Value::Timestamp(t) => Value::Timestamp(*t),
        Value::String(s) => match time::parse_timestamp(s) {
            Ok(ts) => Value::Timestamp(ts),
            Err(e) => Value::error(EvalError::range_error(e)),
        },
        Value::Int(i) => {
            let ts = Timestamp::from_seconds(*i);
            if ts.is_valid() {
                Value::Timestamp(ts)
            } else {
                Value::error(EvalError::range_error(
                    "timestamp out of range: must be between year 0001 and 9999",
                ))
            }
        }
        other => Value::error(EvalError::invalid_conversion(&other.type_name(), "timestamp")),
    }
}

fn convert_to_duration(value: &Value) -> Value {
    match value {
        Value::Duration(d) => Value::Duration(*d),
        Value::String(s) => match time::parse_duration(s) {
            Ok(d) => Value::Duration(d),
            Err(e) => Value::error(EvalError::range_error(e)),
        },
        Value::Int(i) => match Duration::normalized(*i, 0) {
            Some(d) => Value::Duration(d),
            None => Value::error(EvalError::range_error(
                "duration out of range: total nanoseconds must fit in int64",
            )),
        },
        other => Value::error(EvalError::invalid_conversion(&other.type_name(), "duration")),
    }
}

/// Canonical decimal spelling of a double.
pub(crate) fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d.is_sign_positive() {
            "+infinity".to_string()
        } else {
            "-infinity".to_string()
        }
    } else if d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{:.1}", d)
    } else {
        d.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{EmptyBindings, MapBindings};
    use crate::lower::lower;

    fn eval_src(src: &str) -> Value {
        let ast = cel_compile_parser::parse(src).expect("parse");
        let ir = lower(&ast, "").expect("lower");
        let registry = crate::ext::standard_registry();
        Interpreter::new(&EmptyBindings, &registry).eval(&ir)
    }

    fn eval_with(src: &str, bindings: &MapBindings) -> Value {
        let ast = cel_compile_parser::parse(src).expect("parse");
        let ir = lower(&ast, "").expect("lower");
        let registry = crate::ext::standard_registry();
        Interpreter::new(bindings, &registry).eval(&ir)
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval_src("null"), Value::Null);
        assert_eq!(eval_src("true"), Value::Bool(true));
        assert_eq!(eval_src("42"), Value::Int(42));
        assert_eq!(eval_src("42u"), Value::UInt(42));
        assert_eq!(eval_src("3.14"), Value::Double(3.14));
        assert_eq!(eval_src("\"hello\""), "hello".into());
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval_src("1 + 2"), Value::Int(3));
        assert_eq!(eval_src("5 - 3"), Value::Int(2));
        assert_eq!(eval_src("3 * 4"), Value::Int(12));
        assert_eq!(eval_src("10 / 3"), Value::Int(3));
        assert_eq!(eval_src("-10 / 3"), Value::Int(-3)); // truncation toward zero
        assert_eq!(eval_src("10 % 3"), Value::Int(1));
        assert_eq!(eval_src("1 + 2 * 3"), Value::Int(7));
    }

    #[test]
    fn test_arithmetic_errors() {
        assert!(eval_src("1 / 0").is_error());
        assert!(eval_src("1 % 0").is_error());
        assert!(eval_src("9223372036854775807 + 1").is_error());
        assert!(eval_src("0u - 1u").is_error());

        let mut bindings = MapBindings::new();
        bindings.insert("min", i64::MIN);
        assert!(eval_with("min / -1", &bindings).is_error());
        assert!(eval_with("-min", &bindings).is_error());
        assert!(eval_with("min - 1", &bindings).is_error());
        // Cross-type arithmetic is strict without dyn
        assert!(eval_src("1 + 1u").is_error());
        assert!(eval_src("1 + 1.0").is_error());
    }

    #[test]
    fn test_double_division_follows_ieee() {
        assert_eq!(eval_src("1.0 / 0.0"), Value::Double(f64::INFINITY));
        assert_eq!(eval_src("-1.0 / 0.0"), Value::Double(f64::NEG_INFINITY));
        match eval_src("0.0 / 0.0") {
            Value::Double(d) => assert!(d.is_nan()),
            other => panic!("expected NaN, got {:?}", other),
        }
    }

    #[test]
    fn test_dyn_relaxed_arithmetic() {
        assert_eq!(eval_src("dyn(1) + 2.5"), Value::Double(3.5));
        assert_eq!(eval_src("dyn(1) + 2u"), Value::Int(3));
        assert_eq!(
            eval_src("dyn(9223372036854775807) + 1u"),
            Value::UInt(9223372036854775808)
        );
    }

    #[test]
    fn test_string_concat() {
        assert_eq!(eval_src("\"foo\" + \"bar\""), "foobar".into());
        assert_eq!(eval_src("b\"ab\" + b\"cd\""), Value::from(b"abcd".to_vec()));
        assert_eq!(eval_src("[1] + [2, 3]"), Value::list([1i64, 2, 3]));
    }

    #[test]
    fn test_comparison() {
        assert_eq!(eval_src("1 < 2"), Value::Bool(true));
        assert_eq!(eval_src("2 <= 2"), Value::Bool(true));
        assert_eq!(eval_src("3 > 2"), Value::Bool(true));
        assert_eq!(eval_src("2 >= 3"), Value::Bool(false));
        assert_eq!(eval_src("false < true"), Value::Bool(true));
        assert_eq!(eval_src("\"a\" < \"b\""), Value::Bool(true));
        // Cross-numeric comparison needs no dyn
        assert_eq!(eval_src("1 < 1.5"), Value::Bool(true));
        assert_eq!(eval_src("1u < 2"), Value::Bool(true));
    }

    #[test]
    fn test_nan_comparisons_false() {
        assert_eq!(eval_src("0.0 / 0.0 < 1.0"), Value::Bool(false));
        assert_eq!(eval_src("0.0 / 0.0 >= 1.0"), Value::Bool(false));
        assert_eq!(eval_src("0.0 / 0.0 == 0.0 / 0.0"), Value::Bool(false));
    }

    #[test]
    fn test_strict_equality() {
        assert_eq!(eval_src("1 == 1"), Value::Bool(true));
        assert_eq!(eval_src("1 != 2"), Value::Bool(true));
        // Mixed numeric tags error without dyn
        assert!(eval_src("1 == 1.0").is_error());
        assert!(eval_src("1 == 1u").is_error());
        // dyn relaxes to numeric-value equality
        assert_eq!(eval_src("dyn(1) == 1.0"), Value::Bool(true));
        assert_eq!(eval_src("dyn(1) == 1u"), Value::Bool(true));
        // Different non-numeric tags are unequal, not errors
        assert_eq!(eval_src("1 == \"1\""), Value::Bool(false));
        assert_eq!(eval_src("null == 0"), Value::Bool(false));
    }

    #[test]
    fn test_logical_absorption_table() {
        // Clean rows
        assert_eq!(eval_src("true && true"), Value::Bool(true));
        assert_eq!(eval_src("true && false"), Value::Bool(false));
        assert_eq!(eval_src("false || false"), Value::Bool(false));
        assert_eq!(eval_src("false || true"), Value::Bool(true));
        // Decisive operand absorbs an error on either side
        assert_eq!(eval_src("false && (1 / 0 == 0)"), Value::Bool(false));
        assert_eq!(eval_src("(1 / 0 == 0) && false"), Value::Bool(false));
        assert_eq!(eval_src("true || (1 / 0 == 0)"), Value::Bool(true));
        assert_eq!(eval_src("(1 / 0 == 0) || true"), Value::Bool(true));
        // No decisive operand: the error propagates
        assert!(eval_src("true && (1 / 0 == 0)").is_error());
        assert!(eval_src("(1 / 0 == 0) && true").is_error());
        assert!(eval_src("false || (1 / 0 == 0)").is_error());
        assert!(eval_src("(1 / 0 == 0) || false").is_error());
        assert!(eval_src("(1 / 0 == 0) && (2 / 0 == 0)").is_error());
        // Non-bool operands become absorbable type errors
        assert_eq!(eval_src("1 && false"), Value::Bool(false));
        assert!(eval_src("1 && true").is_error());
    }

    #[test]
    fn test_ternary() {
        assert_eq!(eval_src("true ? 1 : 2"), Value::Int(1));
        assert_eq!(eval_src("false ? 1 : 2"), Value::Int(2));
        // Only the selected branch evaluates
        assert_eq!(eval_src("true ? 1 : 1 / 0"), Value::Int(1));
        assert_eq!(eval_src("false ? 1 / 0 : 2"), Value::Int(2));
        // Non-bool condition errors without evaluating either branch
        assert!(eval_src("1 ? 1 : 2").is_error());
        assert!(eval_src("(1 / 0) ? 1 : 2").is_error());
    }

    #[test]
    fn test_list_operations() {
        assert_eq!(eval_src("[1, 2, 3][0]"), Value::Int(1));
        assert_eq!(eval_src("[1, 2, 3][2u]"), Value::Int(3));
        assert_eq!(eval_src("[1, 2, 3][1.0]"), Value::Int(2));
        assert!(eval_src("[1, 2, 3][1.5]").is_error());
        assert!(eval_src("[1, 2, 3][3]").is_error());
        assert!(eval_src("[1, 2, 3][-1]").is_error());
        assert_eq!(eval_src("2 in [1, 2, 3]"), Value::Bool(true));
        assert_eq!(eval_src("4 in [1, 2, 3]"), Value::Bool(false));
        assert!(eval_src("1 in 2").is_error());
    }

    #[test]
    fn test_map_operations() {
        assert_eq!(eval_src("{\"a\": 1, \"b\": 2}[\"a\"]"), Value::Int(1));
        assert_eq!(eval_src("{\"a\": 1}.a"), Value::Int(1));
        assert_eq!(eval_src("{1: \"one\"}[1u]"), Value::from("one"));
        assert_eq!(eval_src("{1: \"one\"}[1.0]"), Value::from("one"));
        assert_eq!(eval_src("\"a\" in {\"a\": 1}"), Value::Bool(true));
        assert_eq!(eval_src("\"z\" in {\"a\": 1}"), Value::Bool(false));
        assert!(eval_src("{\"a\": 1}[\"z\"]").is_error());
        assert!(eval_src("{\"a\": 1}.z").is_error());
    }

    #[test]
    fn test_map_construction_rules() {
        // Float and null keys are invalid
        assert!(eval_src("{1.5: \"x\"}").is_error());
        assert!(eval_src("{null: \"x\"}").is_error());
        // Duplicate keys under deep equality are invalid
        assert!(eval_src("{1: \"a\", 1: \"b\"}").is_error());
        assert!(eval_src("{1: \"a\", 1u: \"b\"}").is_error());
    }

    #[test]
    fn test_variables_and_resolution() {
        let mut bindings = MapBindings::new();
        bindings.insert("x", 41i64);
        assert_eq!(eval_with("x + 1", &bindings), Value::Int(42));
        assert!(eval_with("y", &bindings).is_error());
    }

    #[test]
    fn test_longest_prefix_resolution() {
        let mut bindings = MapBindings::new();
        bindings.insert("a.b.c", 1i64);
        bindings.insert("a.b", 2i64);
        bindings.insert(
            "a",
            Value::map([("b", Value::map([("c", Value::Int(3))]))]),
        );
        assert_eq!(eval_with("a.b.c", &bindings), Value::Int(1));

        let mut bindings = MapBindings::new();
        bindings.insert("a.b", Value::map([("c", Value::Int(2))]));
        assert_eq!(eval_with("a.b.c", &bindings), Value::Int(2));

        let mut bindings = MapBindings::new();
        bindings.insert(
            "a",
            Value::map([("b", Value::map([("c", Value::Int(3))]))]),
        );
        assert_eq!(eval_with("a.b.c", &bindings), Value::Int(3));
    }

    #[test]
    fn test_has_macro() {
        let mut bindings = MapBindings::new();
        bindings.insert("a", Value::map([("b", Value::map([("x", Value::Int(1))]))]));
        assert_eq!(eval_with("has(a.b.x)", &bindings), Value::Bool(true));
        assert_eq!(eval_with("has(a.b.y)", &bindings), Value::Bool(false));
        // Missing prefix never errors
        assert_eq!(eval_with("has(z.b.c)", &bindings), Value::Bool(false));
        // A fully-qualified binding key satisfies has() directly
        let mut bindings = MapBindings::new();
        bindings.insert("a.b.c", 1i64);
        assert_eq!(eval_with("has(a.b.c)", &bindings), Value::Bool(true));
    }

    #[test]
    fn test_comprehensions() {
        assert_eq!(eval_src("[1, 2, 3].all(x, x > 0)"), Value::Bool(true));
        assert_eq!(eval_src("[1, -2, 3].all(x, x > 0)"), Value::Bool(false));
        assert_eq!(eval_src("[].all(x, x > 0)"), Value::Bool(true));
        assert_eq!(eval_src("[1, 2].exists(x, x == 2)"), Value::Bool(true));
        assert_eq!(eval_src("[].exists(x, true)"), Value::Bool(false));
        assert_eq!(eval_src("[1, 2, 2].exists_one(x, x == 1)"), Value::Bool(true));
        assert_eq!(
            eval_src("[1, 2, 2].exists_one(x, x == 2)"),
            Value::Bool(false)
        );
        assert_eq!(eval_src("[1, 2].map(x, x * 2)"), Value::list([2i64, 4]));
        assert_eq!(
            eval_src("[1, 2, 3].map(x, x > 1, x * 10)"),
            Value::list([20i64, 30])
        );
        assert_eq!(eval_src("[1, 2, 3].filter(x, x > 1)"), Value::list([2i64, 3]));
    }

    #[test]
    fn test_comprehension_error_absorption() {
        // all absorbs predicate errors when a decisive false exists
        assert_eq!(
            eval_src("[1, 0, 2].all(x, 1 / x > 0)"),
            Value::Bool(false)
        );
        // but propagates when every element errors or passes
        assert!(eval_src("[0].all(x, 1 / x > 0)").is_error());
        // exists mirrors
        assert_eq!(eval_src("[0, 1].exists(x, 1 / x > 0)"), Value::Bool(true));
        assert!(eval_src("[0].exists(x, 1 / x > 0)").is_error());
        // map/filter propagate
        assert!(eval_src("[1, 0].map(x, 1 / x)").is_error());
        assert!(eval_src("[1, 0].filter(x, 1 / x > 0)").is_error());
    }

    #[test]
    fn test_two_variable_comprehensions() {
        // iter_var binds the index, iter_var2 the element
        assert_eq!(
            eval_src("[10, 20].all(i, v, v == (i + 1) * 10)"),
            Value::Bool(true)
        );
        // For maps: key and value
        assert_eq!(
            eval_src("{\"a\": 1, \"b\": 2}.exists(k, v, k == \"b\" && v == 2)"),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_map_comprehension_iterates_keys() {
        assert_eq!(
            eval_src("{\"a\": 1, \"b\": 2}.all(k, k in [\"a\", \"b\"])"),
            Value::Bool(true)
        );
        assert_eq!(eval_src("{1: \"x\"}.map(k, k)"), Value::list([1i64]));
    }

    #[test]
    fn test_optional_chaining() {
        assert_eq!(eval_src("{\"a\": 1}.?a"), Value::optional_some(Value::Int(1)));
        assert_eq!(eval_src("{\"a\": 1}.?b"), Value::optional_none());
        assert_eq!(eval_src("{\"a\": 1}.?b.?c"), Value::optional_none());
        assert_eq!(eval_src("[1][?0]"), Value::optional_some(Value::Int(1)));
        assert_eq!(eval_src("[1][?5]"), Value::optional_none());
    }

    #[test]
    fn test_optional_literal_entries() {
        assert_eq!(
            eval_src("[1, ?{\"a\": 2}.?a, ?{\"a\": 2}.?b]"),
            Value::list([1i64, 2])
        );
        assert_eq!(
            eval_src("{\"x\": 1, ?\"y\": {\"a\": 2}.?b}"),
            Value::map([("x", Value::Int(1))])
        );
    }

    #[test]
    fn test_conversions() {
        assert_eq!(eval_src("int(3.9)"), Value::Int(3));
        assert_eq!(eval_src("int(-3.9)"), Value::Int(-3));
        assert_eq!(eval_src("int(\"42\")"), Value::Int(42));
        assert!(eval_src("int(\"0x1F\")").is_error());
        assert!(eval_src("int(\"1e3\")").is_error());
        assert!(eval_src("int(\"1.5\")").is_error());
        assert!(eval_src("int(1.0 / 0.0)").is_error());
        assert!(eval_src("int(0.0 / 0.0)").is_error());
        assert!(eval_src("int(9223372036854775808.0)").is_error());

        assert_eq!(eval_src("uint(42)"), Value::UInt(42));
        assert!(eval_src("uint(-1)").is_error());
        assert!(eval_src("uint(-0.5)").is_error());

        assert_eq!(eval_src("double(42)"), Value::Double(42.0));
        assert_eq!(eval_src("double(\"1.5\")"), Value::Double(1.5));

        assert_eq!(eval_src("string(42)"), "42".into());
        assert_eq!(eval_src("string(42u)"), "42".into());
        assert_eq!(eval_src("string(1.5)"), "1.5".into());
        assert_eq!(eval_src("string(true)"), "true".into());
        assert_eq!(eval_src("string(b\"abc\")"), "abc".into());

        assert_eq!(eval_src("bool(\"true\")"), Value::Bool(true));
        assert_eq!(eval_src("bool(\"T\")"), Value::Bool(true));
        assert_eq!(eval_src("bool(\"1\")"), Value::Bool(true));
        assert_eq!(eval_src("bool(\"False\")"), Value::Bool(false));
        assert!(eval_src("bool(\"yes\")").is_error());

        assert_eq!(eval_src("bytes(\"abc\")"), Value::from(b"abc".to_vec()));
        assert_eq!(eval_src("type(1)"), Value::Type(TypeValue::int_type()));
        assert_eq!(eval_src("type(1) == int"), Value::Bool(true));
    }

    #[test]
    fn test_round_trips() {
        assert_eq!(eval_src("int(string(42))"), Value::Int(42));
        assert_eq!(eval_src("string(int(42.0))"), "42".into());
    }

    #[test]
    fn test_timestamp_arithmetic() {
        assert_eq!(
            eval_src(
                "timestamp(\"2024-01-01T00:00:00Z\") + duration(\"24h\") == timestamp(\"2024-01-02T00:00:00Z\")"
            ),
            Value::Bool(true)
        );
        assert_eq!(
            eval_src(
                "timestamp(\"2024-01-02T00:00:00Z\") - timestamp(\"2024-01-01T00:00:00Z\") == duration(\"24h\")"
            ),
            Value::Bool(true)
        );
        assert_eq!(
            eval_src("duration(\"1h\") + duration(\"30m\") == duration(\"90m\")"),
            Value::Bool(true)
        );
        // Out of range
        assert!(eval_src("timestamp(\"9999-12-31T23:59:59Z\") + duration(\"48h\")").is_error());
    }

    #[test]
    fn test_timestamp_comparison() {
        assert_eq!(
            eval_src("timestamp(\"2024-01-01T00:00:00Z\") < timestamp(\"2024-01-02T00:00:00Z\")"),
            Value::Bool(true)
        );
        assert_eq!(
            eval_src("duration(\"1h\") < duration(\"90m\")"),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_struct_literals() {
        let v = eval_src("cel.expr.conformance.proto3.TestAllTypes{single_int32: 5}");
        match v {
            Value::Struct(s) => {
                assert_eq!(s.get("single_int32"), Some(&Value::Int(5)));
            }
            other => panic!("expected struct, got {:?}", other),
        }
        // Wrapper types unwrap at construction
        assert_eq!(
            eval_src("google.protobuf.Int32Value{value: 7}"),
            Value::Int(7)
        );
    }

    #[test]
    fn test_nested_local_shadowing() {
        let mut bindings = MapBindings::new();
        bindings.insert("x", 100i64);
        // The comprehension variable shadows the outer binding
        assert_eq!(
            eval_with("[1, 2].map(x, x * 2)", &bindings),
            Value::list([2i64, 4])
        );
        // And the outer binding is restored afterwards
        assert_eq!(
            eval_with("[1].map(x, x).size() + x", &bindings),
            Value::Int(101)
        );
    }

    #[test]
    fn test_bind_evaluates_once() {
        assert_eq!(
            eval_src("optional.of(21).optMap(v, v * 2)"),
            Value::optional_some(Value::Int(42))
        );
        assert_eq!(
            eval_src("optional.none().optMap(v, v * 2)"),
            Value::optional_none()
        );
    }
}
