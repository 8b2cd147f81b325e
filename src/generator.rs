//! The backend contract driven by the syntax tree.
//!
//! A [`Generator`] is everything a backend has to implement: the tree walks
//! its statements and calls the typed hooks below. Two implementations
//! exist, the cranelift JIT in [`bytecode`](crate::bytecode) and the
//! C-source emitter in [`ccode`](crate::ccode); both must produce the same
//! observable output for the same tree.
//!
//! Hooks that produce a value follow a stack discipline: literals and
//! conversions push, operators consume their operands and push the result.
//! How the stack is represented (JIT value handles, C expression text) is
//! private to the backend.

use crate::ast::{EmitResult, Expression, Filter, Statements, Variable};

/// Emission hooks the syntax tree drives a backend through.
pub trait Generator {
    /// Output raw template text verbatim.
    fn raw(&mut self, data: &str) -> EmitResult;

    /// Output a value-typed expression (variable or filter), escaping the
    /// string form through the active escaper when `escape` is set.
    fn output(&mut self, expression: &Expression, escape: bool) -> EmitResult;

    /// Write an expression with a known static type as a string.
    fn write(&mut self, expression: &Expression) -> EmitResult;

    /// Push a pointer to a named variable.
    fn var_pointer(&mut self, name: &str) -> EmitResult;

    /// Push a pointer to a member of `parent`, accessed by a fixed name.
    fn member_pointer(&mut self, parent: &Variable, name: &str) -> EmitResult;

    /// Push a pointer to a member of `parent`, accessed by an index
    /// expression: positional when the index is statically numeric, by
    /// string key otherwise.
    fn member_pointer_at(&mut self, parent: &Variable, index: &Expression) -> EmitResult;

    /// Push a string constant as buffer and size.
    fn string_literal(&mut self, value: &str) -> EmitResult;

    /// Push an integer constant.
    fn numeric_literal(&mut self, value: i64) -> EmitResult;

    /// Push a floating point constant.
    fn double_literal(&mut self, value: f64) -> EmitResult;

    /// Push the string form (buffer and size) of a value-typed expression.
    fn string_value(&mut self, source: &Expression) -> EmitResult;

    /// Push the numeric form of a value-typed expression.
    fn numeric_value(&mut self, source: &Expression) -> EmitResult;

    /// Push the boolean form of a value-typed expression.
    fn boolean_value(&mut self, source: &Expression) -> EmitResult;

    /// Push the floating point form of a value-typed expression.
    fn double_value(&mut self, source: &Expression) -> EmitResult;

    /// Push the string form (buffer and size) of a statically numeric
    /// expression.
    fn numeric_to_string(&mut self, expression: &Expression) -> EmitResult;

    /// Push the numeric form of a statically string expression.
    fn string_to_numeric(&mut self, expression: &Expression) -> EmitResult;

    // arithmetic: consume two operands, push the result
    fn plus(&mut self, left: &Expression, right: &Expression) -> EmitResult;
    fn minus(&mut self, left: &Expression, right: &Expression) -> EmitResult;
    fn multiply(&mut self, left: &Expression, right: &Expression) -> EmitResult;
    fn divide(&mut self, left: &Expression, right: &Expression) -> EmitResult;
    fn modulo(&mut self, left: &Expression, right: &Expression) -> EmitResult;

    // comparison: consume two operands, push 0 or 1
    fn equals(&mut self, left: &Expression, right: &Expression) -> EmitResult;
    fn not_equals(&mut self, left: &Expression, right: &Expression) -> EmitResult;
    fn greater(&mut self, left: &Expression, right: &Expression) -> EmitResult;
    fn greater_equals(&mut self, left: &Expression, right: &Expression) -> EmitResult;
    fn lesser(&mut self, left: &Expression, right: &Expression) -> EmitResult;
    fn lesser_equals(&mut self, left: &Expression, right: &Expression) -> EmitResult;

    // boolean: short-circuit; the untaken arm is never evaluated
    fn boolean_and(&mut self, left: &Expression, right: &Expression) -> EmitResult;
    fn boolean_or(&mut self, left: &Expression, right: &Expression) -> EmitResult;
    fn boolean_not(&mut self, expression: &Expression) -> EmitResult;

    /// Conditional statement with an optional else arm.
    fn condition(
        &mut self,
        expression: &Expression,
        then_branch: &Statements,
        else_branch: Option<&Statements>,
    ) -> EmitResult;

    /// Loop over an iterable source, binding the value (and optionally the
    /// key) name on each iteration. The else arm runs when the source has
    /// nothing to iterate.
    fn foreach(
        &mut self,
        source: &Variable,
        key: Option<&str>,
        value: &str,
        body: &Statements,
        else_branch: Option<&Statements>,
    ) -> EmitResult;

    /// Assign the expression's value to a local variable.
    fn assign(&mut self, name: &str, expression: &Expression) -> EmitResult;

    /// Apply a filter chain to its base expression, leaving the resulting
    /// value pointer behind. Modifiers apply left to right.
    fn modifiers(&mut self, filter: &Filter) -> EmitResult;
}
