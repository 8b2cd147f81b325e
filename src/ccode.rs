//! The ahead-of-time backend: turns a syntax tree into portable C source.
//!
//! The emitted file includes the engine's callback header and defines one
//! exported entry, `void show_template(void *userdata)`. Compiled into a
//! shared object it can be loaded later as an alternative executor; all
//! engine interaction goes through the same callback ABI the JIT uses, so
//! both backends produce byte-identical output. String literals carry an
//! explicit size, nothing relies on null terminators.

use crate::ast::{
    EmitResult, Expression, ExprType, Filter, Statements, SyntaxTree, Variable as TplVariable,
};
use crate::error::{CompileError, Error};
use crate::generator::Generator;

/// The C-source generator.
pub struct CCode {
    /// Accumulated C source.
    out: String,
    /// Current indentation depth.
    depth: usize,
    /// Counter for generated local identifiers.
    next_id: usize,
}

impl CCode {
    /// Emits C source for a syntax tree.
    pub fn new(tree: &SyntaxTree) -> Result<Self, Error> {
        let mut ccode = Self {
            out: String::new(),
            depth: 1,
            next_id: 0,
        };
        ccode.out.push_str("#include <smarttpl/callbacks.h>\n");
        ccode.out.push_str("#include <stdint.h>\n\n");
        ccode.out.push_str("void show_template(void *userdata) {\n");
        tree.generate(&mut ccode).map_err(Error::Compile)?;
        ccode.out.push_str("}\n");
        Ok(ccode)
    }

    /// The generated C source.
    pub fn as_string(&self) -> &str {
        &self.out
    }

    /// Consumes the generator, returning the C source.
    pub fn into_string(self) -> String {
        self.out
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("    ");
        }
    }

    fn fresh_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    fn emit(&mut self, text: &str) {
        self.out.push_str(text);
    }

    /// Emits a quoted C string literal plus its byte size.
    fn string_pair(&mut self, text: &str) {
        self.emit("\"");
        let escaped = c_escape(text);
        self.emit(&escaped);
        self.emit("\",");
        self.emit(&text.len().to_string());
    }

    /// Renders a sub-emission into a string, so an expression can be
    /// spliced more than once.
    fn capture(
        &mut self,
        f: impl FnOnce(&mut Self) -> EmitResult,
    ) -> Result<String, CompileError> {
        let saved = std::mem::take(&mut self.out);
        let result = f(self);
        let captured = std::mem::replace(&mut self.out, saved);
        result?;
        Ok(captured)
    }

    /// Captures the pointer expression for a value-typed expression.
    fn capture_pointer(&mut self, expression: &Expression) -> Result<String, CompileError> {
        self.capture(|ccode| expression.pointer(ccode))
    }

    /// Emits the value-pointer expression for a filter base; computed
    /// scalars are wrapped through the typed callbacks.
    fn filter_base_pointer(&mut self, base: &Expression) -> EmitResult {
        match base.static_type() {
            ExprType::Value => base.pointer(self),
            ExprType::Numeric => {
                self.emit("smart_tpl_numeric_to_string(userdata,");
                base.numeric(self)?;
                self.emit(")");
                Ok(())
            }
            ExprType::Double => {
                self.emit("smart_tpl_double_to_string(userdata,");
                base.double(self)?;
                self.emit(")");
                Ok(())
            }
            ExprType::String | ExprType::Boolean => Err(CompileError::emit(
                "modifiers cannot be applied to this expression",
            )),
        }
    }

    /// Emits the modifier chain around the base pointer, innermost first.
    fn filter_chain(&mut self, filter: &Filter, length: usize) -> EmitResult {
        if length == 0 {
            return self.filter_base_pointer(&filter.base);
        }
        let modifier = &filter.chain[length - 1];
        self.emit("smart_tpl_modify_variable(userdata,smart_tpl_modifier(userdata,");
        self.string_pair(&modifier.token);
        self.emit("),");
        self.filter_chain(filter, length - 1)?;
        self.emit(")");
        Ok(())
    }

    /// Emits an integer division or modulo with the zero and overflow
    /// guards folded into a conditional expression.
    fn guarded_division(
        &mut self,
        left: &Expression,
        right: &Expression,
        operator: &str,
        zero_message: &str,
    ) -> EmitResult {
        let l = self.capture(|ccode| left.numeric(ccode))?;
        let r = self.capture(|ccode| right.numeric(ccode))?;

        self.emit("((");
        self.emit(&r);
        self.emit(")==0 ? (smart_tpl_error(userdata,");
        self.string_pair(zero_message);
        self.emit("),(int64_t)0) : ((");
        self.emit(&r);
        self.emit(")==-1 && (");
        self.emit(&l);
        self.emit(")==INT64_MIN ? (smart_tpl_error(userdata,");
        self.string_pair("Overflow during checked arithmetic operation");
        self.emit("),(int64_t)0) : (");
        self.emit(&l);
        self.emit(")");
        self.emit(operator);
        self.emit("(");
        self.emit(&r);
        self.emit(")))");
        Ok(())
    }

    fn binary_numeric(
        &mut self,
        left: &Expression,
        right: &Expression,
        operator: &str,
    ) -> EmitResult {
        self.emit("(");
        left.numeric(self)?;
        self.emit(operator);
        right.numeric(self)?;
        self.emit(")");
        Ok(())
    }

    fn comparison(&mut self, left: &Expression, right: &Expression, operator: &str) -> EmitResult {
        self.binary_numeric(left, right, operator)
    }

    fn equality(&mut self, left: &Expression, right: &Expression, negate: bool) -> EmitResult {
        use ExprType::*;
        match (left.static_type(), right.static_type()) {
            (String, String) => {
                self.emit("(smart_tpl_strcmp(userdata,");
                left.string(self)?;
                self.emit(",");
                right.string(self)?;
                self.emit(if negate { ")!=0)" } else { ")==0)" });
                Ok(())
            }
            (Boolean, Boolean) => {
                self.emit("(");
                left.boolean(self)?;
                self.emit(if negate { "!=" } else { "==" });
                right.boolean(self)?;
                self.emit(")");
                Ok(())
            }
            (String, _) | (_, String) | (Boolean, _) | (_, Boolean) => Err(CompileError::emit(
                "comparison between incompatible static types",
            )),
            (Double, _) | (_, Double) => {
                self.emit("(");
                left.double(self)?;
                self.emit(if negate { "!=" } else { "==" });
                right.double(self)?;
                self.emit(")");
                Ok(())
            }
            _ => self.comparison(left, right, if negate { "!=" } else { "==" }),
        }
    }
}

impl Generator for CCode {
    fn raw(&mut self, data: &str) -> EmitResult {
        if data.is_empty() {
            return Ok(());
        }
        self.indent();
        self.emit("smart_tpl_write(userdata,");
        self.string_pair(data);
        self.emit(");\n");
        Ok(())
    }

    fn output(&mut self, expression: &Expression, escape: bool) -> EmitResult {
        self.indent();
        self.emit("smart_tpl_output(userdata,");
        expression.pointer(self)?;
        self.emit(if escape { ",1);\n" } else { ",0);\n" });
        Ok(())
    }

    fn write(&mut self, expression: &Expression) -> EmitResult {
        match expression.static_type() {
            ExprType::String => {
                self.indent();
                self.emit("smart_tpl_write(userdata,");
                expression.string(self)?;
                self.emit(");\n");
                Ok(())
            }
            ExprType::Numeric | ExprType::Boolean => {
                let id = self.fresh_id();
                self.indent();
                self.emit(&format!(
                    "{{ void *value_{} = smart_tpl_numeric_to_string(userdata,",
                    id
                ));
                expression.numeric(self)?;
                self.emit(&format!(
                    "); smart_tpl_write(userdata,smart_tpl_to_string(userdata,value_{}),smart_tpl_size(userdata,value_{})); }}\n",
                    id, id
                ));
                Ok(())
            }
            ExprType::Double => {
                let id = self.fresh_id();
                self.indent();
                self.emit(&format!(
                    "{{ void *value_{} = smart_tpl_double_to_string(userdata,",
                    id
                ));
                expression.double(self)?;
                self.emit(&format!(
                    "); smart_tpl_write(userdata,smart_tpl_to_string(userdata,value_{}),smart_tpl_size(userdata,value_{})); }}\n",
                    id, id
                ));
                Ok(())
            }
            ExprType::Value => Err(CompileError::emit(
                "internal: value-typed expressions go through output",
            )),
        }
    }

    fn var_pointer(&mut self, name: &str) -> EmitResult {
        self.emit("smart_tpl_variable(userdata,");
        self.string_pair(name);
        self.emit(")");
        Ok(())
    }

    fn member_pointer(&mut self, parent: &TplVariable, name: &str) -> EmitResult {
        self.emit("smart_tpl_member(userdata,");
        parent.pointer(self)?;
        self.emit(",");
        self.string_pair(name);
        self.emit(")");
        Ok(())
    }

    fn member_pointer_at(&mut self, parent: &TplVariable, index: &Expression) -> EmitResult {
        if index.static_type() == ExprType::Numeric {
            self.emit("smart_tpl_member_at(userdata,");
            parent.pointer(self)?;
            self.emit(",");
            index.numeric(self)?;
            self.emit(")");
        } else {
            self.emit("smart_tpl_member(userdata,");
            parent.pointer(self)?;
            self.emit(",");
            index.string(self)?;
            self.emit(")");
        }
        Ok(())
    }

    fn string_literal(&mut self, value: &str) -> EmitResult {
        self.string_pair(value);
        Ok(())
    }

    fn numeric_literal(&mut self, value: i64) -> EmitResult {
        if value == i64::MIN {
            // INT64_MIN has no literal form in C
            self.emit("INT64_MIN");
        } else {
            self.emit(&value.to_string());
        }
        Ok(())
    }

    fn double_literal(&mut self, value: f64) -> EmitResult {
        self.emit(&format!("{:e}", value));
        Ok(())
    }

    fn string_value(&mut self, source: &Expression) -> EmitResult {
        let pointer = self.capture_pointer(source)?;
        self.emit("smart_tpl_to_string(userdata,");
        self.emit(&pointer);
        self.emit("),smart_tpl_size(userdata,");
        self.emit(&pointer);
        self.emit(")");
        Ok(())
    }

    fn numeric_value(&mut self, source: &Expression) -> EmitResult {
        self.emit("smart_tpl_to_numeric(userdata,");
        source.pointer(self)?;
        self.emit(")");
        Ok(())
    }

    fn boolean_value(&mut self, source: &Expression) -> EmitResult {
        self.emit("smart_tpl_to_boolean(userdata,");
        source.pointer(self)?;
        self.emit(")");
        Ok(())
    }

    fn double_value(&mut self, source: &Expression) -> EmitResult {
        self.emit("smart_tpl_to_double(userdata,");
        source.pointer(self)?;
        self.emit(")");
        Ok(())
    }

    fn numeric_to_string(&mut self, expression: &Expression) -> EmitResult {
        let numeric = self.capture(|ccode| expression.numeric(ccode))?;
        self.emit("smart_tpl_to_string(userdata,smart_tpl_numeric_to_string(userdata,");
        self.emit(&numeric);
        self.emit(")),smart_tpl_size(userdata,smart_tpl_numeric_to_string(userdata,");
        self.emit(&numeric);
        self.emit("))");
        Ok(())
    }

    fn string_to_numeric(&mut self, expression: &Expression) -> EmitResult {
        self.emit("smart_tpl_string_to_numeric(userdata,");
        expression.string(self)?;
        self.emit(")");
        Ok(())
    }

    fn plus(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.binary_numeric(left, right, "+")
    }

    fn minus(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.binary_numeric(left, right, "-")
    }

    fn multiply(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.binary_numeric(left, right, "*")
    }

    fn divide(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.guarded_division(left, right, "/", "Division by zero")
    }

    fn modulo(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.guarded_division(left, right, "%", "Modulo by zero")
    }

    fn equals(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.equality(left, right, false)
    }

    fn not_equals(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.equality(left, right, true)
    }

    fn greater(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.comparison(left, right, ">")
    }

    fn greater_equals(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.comparison(left, right, ">=")
    }

    fn lesser(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.comparison(left, right, "<")
    }

    fn lesser_equals(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.comparison(left, right, "<=")
    }

    fn boolean_and(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.emit("(");
        left.boolean(self)?;
        self.emit(" && ");
        right.boolean(self)?;
        self.emit(")");
        Ok(())
    }

    fn boolean_or(&mut self, left: &Expression, right: &Expression) -> EmitResult {
        self.emit("(");
        left.boolean(self)?;
        self.emit(" || ");
        right.boolean(self)?;
        self.emit(")");
        Ok(())
    }

    fn boolean_not(&mut self, expression: &Expression) -> EmitResult {
        self.emit("(!");
        expression.boolean(self)?;
        self.emit(")");
        Ok(())
    }

    fn condition(
        &mut self,
        expression: &Expression,
        then_branch: &Statements,
        else_branch: Option<&Statements>,
    ) -> EmitResult {
        self.indent();
        self.emit("if (");
        expression.boolean(self)?;
        self.emit(") {\n");
        self.depth += 1;
        then_branch.generate(self)?;
        self.depth -= 1;
        if let Some(else_branch) = else_branch {
            self.indent();
            self.emit("} else {\n");
            self.depth += 1;
            else_branch.generate(self)?;
            self.depth -= 1;
        }
        self.indent();
        self.emit("}\n");
        Ok(())
    }

    fn foreach(
        &mut self,
        source: &TplVariable,
        key: Option<&str>,
        value: &str,
        body: &Statements,
        else_branch: Option<&Statements>,
    ) -> EmitResult {
        let id = self.fresh_id();

        self.indent();
        self.emit("{\n");
        self.depth += 1;

        // capture the pre-loop bindings of the induction names
        self.indent();
        self.emit(&format!("void *pre_value_{} = smart_tpl_variable(userdata,", id));
        self.string_pair(value);
        self.emit(");\n");
        if let Some(key) = key {
            self.indent();
            self.emit(&format!("void *pre_key_{} = smart_tpl_variable(userdata,", id));
            self.string_pair(key);
            self.emit(");\n");
        }

        self.indent();
        self.emit(&format!("void *iter_{} = smart_tpl_create_iterator(userdata,", id));
        source.pointer(self)?;
        self.emit(");\n");

        self.indent();
        self.emit(&format!("if (smart_tpl_valid_iterator(userdata,iter_{})) {{\n", id));
        self.depth += 1;
        self.indent();
        self.emit("do {\n");
        self.depth += 1;

        if let Some(key) = key {
            self.indent();
            self.emit("smart_tpl_assign(userdata,");
            self.string_pair(key);
            self.emit(&format!(",smart_tpl_iterator_key(userdata,iter_{}));\n", id));
        }
        self.indent();
        self.emit("smart_tpl_assign(userdata,");
        self.string_pair(value);
        self.emit(&format!(",smart_tpl_iterator_value(userdata,iter_{}));\n", id));

        body.generate(self)?;

        self.indent();
        self.emit(&format!("smart_tpl_iterator_next(userdata,iter_{});\n", id));
        self.depth -= 1;
        self.indent();
        self.emit(&format!("}} while (smart_tpl_valid_iterator(userdata,iter_{}));\n", id));
        self.depth -= 1;

        if let Some(else_branch) = else_branch {
            self.indent();
            self.emit("} else {\n");
            self.depth += 1;
            else_branch.generate(self)?;
            self.depth -= 1;
        }
        self.indent();
        self.emit("}\n");

        // restore what the induction names meant before the loop
        self.indent();
        self.emit("smart_tpl_assign(userdata,");
        self.string_pair(value);
        self.emit(&format!(",pre_value_{});\n", id));
        if let Some(key) = key {
            self.indent();
            self.emit("smart_tpl_assign(userdata,");
            self.string_pair(key);
            self.emit(&format!(",pre_key_{});\n", id));
        }

        self.depth -= 1;
        self.indent();
        self.emit("}\n");
        Ok(())
    }

    fn assign(&mut self, name: &str, expression: &Expression) -> EmitResult {
        self.indent();
        match expression.static_type() {
            ExprType::Numeric => {
                self.emit("smart_tpl_assign_numeric(userdata,");
                self.string_pair(name);
                self.emit(",");
                expression.numeric(self)?;
            }
            ExprType::Double => {
                self.emit("smart_tpl_assign_double(userdata,");
                self.string_pair(name);
                self.emit(",");
                expression.double(self)?;
            }
            ExprType::Boolean => {
                self.emit("smart_tpl_assign_boolean(userdata,");
                self.string_pair(name);
                self.emit(",");
                expression.boolean(self)?;
            }
            ExprType::String => {
                self.emit("smart_tpl_assign_string(userdata,");
                self.string_pair(name);
                self.emit(",");
                expression.string(self)?;
            }
            ExprType::Value => {
                self.emit("smart_tpl_assign(userdata,");
                self.string_pair(name);
                self.emit(",");
                expression.pointer(self)?;
            }
        }
        self.emit(");\n");
        Ok(())
    }

    fn modifiers(&mut self, filter: &Filter) -> EmitResult {
        self.filter_chain(filter, filter.chain.len())
    }
}

/// Escapes text for a C string literal, octal-escaping anything outside
/// printable ASCII.
fn c_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(byte as char),
            other => out.push_str(&format!("\\{:03o}", other)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn ccode(source: &str) -> String {
        let tree = parser::parse(source).unwrap();
        CCode::new(&tree).unwrap().into_string()
    }

    #[test]
    fn entry_function_and_raw_write() {
        let out = ccode("hello\n");
        assert!(out.contains("void show_template(void *userdata) {"));
        assert!(out.contains("smart_tpl_write(userdata,\"hello\\n\",6);"));
    }

    #[test]
    fn variable_output_is_escaped_by_default() {
        let out = ccode("{$name}");
        assert!(out.contains(
            "smart_tpl_output(userdata,smart_tpl_variable(userdata,\"name\",4),1);"
        ));
        let raw = ccode("{$name|raw}");
        assert!(raw.contains(",0);"));
    }

    #[test]
    fn member_paths_nest() {
        let out = ccode("{$a.b}");
        assert!(out.contains(
            "smart_tpl_member(userdata,smart_tpl_variable(userdata,\"a\",1),\"b\",1)"
        ));
    }

    #[test]
    fn foreach_emits_iterator_protocol() {
        let out = ccode("{foreach $i in $l}x{/foreach}");
        assert!(out.contains("smart_tpl_create_iterator(userdata,"));
        assert!(out.contains("do {"));
        assert!(out.contains("} while (smart_tpl_valid_iterator(userdata,iter_1));"));
        assert!(out.contains("smart_tpl_iterator_next(userdata,iter_1);"));
        // induction binding is restored after the loop
        assert!(out.contains(",pre_value_1);"));
    }

    #[test]
    fn division_carries_a_zero_guard() {
        let out = ccode("{1/0}");
        assert!(out.contains("Division by zero"));
        assert!(out.contains("smart_tpl_error(userdata,"));
    }

    #[test]
    fn string_comparison_uses_strcmp() {
        let out = ccode("{if \"a\" == \"b\"}t{/if}");
        assert!(out.contains("smart_tpl_strcmp(userdata,\"a\",1,\"b\",1)==0"));
    }

    #[test]
    fn modifier_chain_nests_left_to_right() {
        let out = ccode("{$x|tolower|toupper}");
        let lower = out.find("\"tolower\"").unwrap();
        let upper = out.find("\"toupper\"").unwrap();
        // the outermost call is the last modifier in the chain
        assert!(upper < lower);
    }
}
