//! The typed syntax tree produced by the parser.
//!
//! The tree is immutable once built; generators only read it. Every node
//! knows how to drive a [`Generator`](crate::generator::Generator) through
//! the emission hooks relevant to it, and every expression reports the
//! static type that decides which lowering a backend picks.

use crate::error::CompileError;
use crate::generator::Generator;

/// Emission result; an error aborts code generation.
pub type EmitResult = Result<(), CompileError>;

/// The static type of an expression, known at compile time.
///
/// `Value` means "only known at runtime" and applies to variables and
/// filter results; the other four come from literals and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprType {
    Value,
    Numeric,
    Double,
    Boolean,
    String,
}

/// A literal constant in an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Double(f64),
    String(String),
    Boolean(bool),
    Null,
}

impl Literal {
    /// Serialized form used for modifier parameter tokens.
    pub fn token_text(&self) -> String {
        match self {
            Literal::Integer(v) => v.to_string(),
            Literal::Double(v) => format!("{:.6}", v),
            Literal::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            Literal::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
            Literal::Null => "null".to_string(),
        }
    }
}

/// A variable path: a name root extended by member accessors.
#[derive(Debug, Clone, PartialEq)]
pub enum Variable {
    /// `$name`
    Global { name: String },
    /// `$parent.name`
    Member { parent: Box<Variable>, name: String },
    /// `$parent[expr]`; a statically numeric index is positional access,
    /// anything else is lowered to a string key.
    MemberAt {
        parent: Box<Variable>,
        index: Box<Expression>,
    },
}

impl Variable {
    /// Emits the code that leaves a pointer to this variable behind.
    pub fn pointer(&self, gen: &mut dyn Generator) -> EmitResult {
        match self {
            Variable::Global { name } => gen.var_pointer(name),
            Variable::Member { parent, name } => gen.member_pointer(parent, name),
            Variable::MemberAt { parent, index } => gen.member_pointer_at(parent, index),
        }
    }
}

/// One modifier application in a filter chain, e.g. `tolower` or
/// `default:"n/a"`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifierCall {
    /// Name the modifier was registered under.
    pub name: String,
    /// The full token passed through the modifier callback, the name with
    /// the serialized literal arguments attached (`name:arg1,arg2`).
    pub token: String,
}

impl ModifierCall {
    /// Builds a modifier call, serializing the arguments into the token.
    pub fn new(name: String, args: Vec<Literal>) -> Self {
        let token = if args.is_empty() {
            name.clone()
        } else {
            let rendered: Vec<String> = args.iter().map(Literal::token_text).collect();
            format!("{}:{}", name, rendered.join(","))
        };
        Self { name, token }
    }
}

/// A base expression with a chain of modifiers applied left to right.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub base: Box<Expression>,
    pub chain: Vec<ModifierCall>,
    /// True when the chain ended in the `raw` pseudo-modifier, which
    /// disables output escaping instead of transforming the value.
    pub raw_output: bool,
}

/// Binary operators, grouped the way the generator hooks are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Equals,
    NotEquals,
    Greater,
    GreaterEquals,
    Lesser,
    LesserEquals,
    And,
    Or,
}

impl BinaryOp {
    /// Whether this is `+ - * / %`.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Plus
                | BinaryOp::Minus
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulo
        )
    }

    /// Whether this is a comparison operator.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equals
                | BinaryOp::NotEquals
                | BinaryOp::Greater
                | BinaryOp::GreaterEquals
                | BinaryOp::Lesser
                | BinaryOp::LesserEquals
        )
    }
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Variable(Variable),
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// Unary boolean negation, `!expr`.
    Not(Box<Expression>),
    Filter(Filter),
}

impl Expression {
    /// The static type that drives lowering decisions.
    pub fn static_type(&self) -> ExprType {
        match self {
            Expression::Literal(Literal::Integer(_)) => ExprType::Numeric,
            Expression::Literal(Literal::Double(_)) => ExprType::Double,
            Expression::Literal(Literal::String(_)) => ExprType::String,
            Expression::Literal(Literal::Boolean(_)) => ExprType::Boolean,
            Expression::Literal(Literal::Null) => ExprType::Numeric,
            Expression::Variable(_) => ExprType::Value,
            Expression::Binary { op, .. } => {
                if op.is_arithmetic() {
                    ExprType::Numeric
                } else {
                    ExprType::Boolean
                }
            }
            Expression::Not(_) => ExprType::Boolean,
            Expression::Filter(_) => ExprType::Value,
        }
    }

    /// Emits the code that leaves a value pointer behind. Only defined for
    /// `Value`-typed expressions (variables and filters).
    pub fn pointer(&self, gen: &mut dyn Generator) -> EmitResult {
        match self {
            Expression::Variable(var) => var.pointer(gen),
            Expression::Filter(filter) => gen.modifiers(filter),
            _ => Err(CompileError::emit(
                "internal: pointer emission requested for a non-value expression",
            )),
        }
    }

    /// Emits the numeric (64-bit integer) form of this expression.
    pub fn numeric(&self, gen: &mut dyn Generator) -> EmitResult {
        match self {
            Expression::Literal(Literal::Integer(v)) => gen.numeric_literal(*v),
            Expression::Literal(Literal::Double(v)) => gen.numeric_literal(*v as i64),
            Expression::Literal(Literal::Boolean(b)) => gen.numeric_literal(i64::from(*b)),
            Expression::Literal(Literal::String(_)) | Expression::Literal(Literal::Null) => {
                gen.numeric_literal(0)
            }
            Expression::Variable(_) | Expression::Filter(_) => gen.numeric_value(self),
            Expression::Binary { op, left, right } => emit_binary(gen, *op, left, right),
            Expression::Not(inner) => gen.boolean_not(inner),
        }
    }

    /// Emits the boolean (0/1) form of this expression.
    pub fn boolean(&self, gen: &mut dyn Generator) -> EmitResult {
        match self {
            Expression::Literal(Literal::Integer(v)) => gen.numeric_literal(i64::from(*v != 0)),
            Expression::Literal(Literal::Double(v)) => gen.numeric_literal(i64::from(*v != 0.0)),
            Expression::Literal(Literal::Boolean(b)) => gen.numeric_literal(i64::from(*b)),
            Expression::Literal(Literal::String(s)) => {
                gen.numeric_literal(i64::from(!s.is_empty()))
            }
            Expression::Literal(Literal::Null) => gen.numeric_literal(0),
            Expression::Variable(_) | Expression::Filter(_) => gen.boolean_value(self),
            Expression::Binary { op, left, right } => emit_binary(gen, *op, left, right),
            Expression::Not(inner) => gen.boolean_not(inner),
        }
    }

    /// Emits the floating point form of this expression.
    pub fn double(&self, gen: &mut dyn Generator) -> EmitResult {
        match self {
            Expression::Literal(Literal::Integer(v)) => gen.double_literal(*v as f64),
            Expression::Literal(Literal::Double(v)) => gen.double_literal(*v),
            Expression::Literal(Literal::Boolean(b)) => {
                gen.double_literal(if *b { 1.0 } else { 0.0 })
            }
            Expression::Literal(Literal::String(_)) | Expression::Literal(Literal::Null) => {
                gen.double_literal(0.0)
            }
            Expression::Variable(_) | Expression::Filter(_) => gen.double_value(self),
            Expression::Binary { .. } | Expression::Not(_) => {
                // integer arithmetic; backends widen the result
                self.numeric(gen)
            }
        }
    }

    /// Emits the string (buffer + size) form of this expression.
    pub fn string(&self, gen: &mut dyn Generator) -> EmitResult {
        match self {
            Expression::Literal(Literal::String(s)) => gen.string_literal(s),
            Expression::Literal(Literal::Boolean(_)) => gen.string_literal(""),
            Expression::Literal(Literal::Null) => gen.string_literal(""),
            Expression::Literal(Literal::Integer(v)) => gen.string_literal(&v.to_string()),
            Expression::Literal(Literal::Double(v)) => gen.string_literal(&format!("{:.6}", v)),
            Expression::Variable(_) | Expression::Filter(_) => gen.string_value(self),
            Expression::Binary { .. } | Expression::Not(_) => gen.numeric_to_string(self),
        }
    }
}

fn emit_binary(
    gen: &mut dyn Generator,
    op: BinaryOp,
    left: &Expression,
    right: &Expression,
) -> EmitResult {
    match op {
        BinaryOp::Plus => gen.plus(left, right),
        BinaryOp::Minus => gen.minus(left, right),
        BinaryOp::Multiply => gen.multiply(left, right),
        BinaryOp::Divide => gen.divide(left, right),
        BinaryOp::Modulo => gen.modulo(left, right),
        BinaryOp::Equals => gen.equals(left, right),
        BinaryOp::NotEquals => gen.not_equals(left, right),
        BinaryOp::Greater => gen.greater(left, right),
        BinaryOp::GreaterEquals => gen.greater_equals(left, right),
        BinaryOp::Lesser => gen.lesser(left, right),
        BinaryOp::LesserEquals => gen.lesser_equals(left, right),
        BinaryOp::And => gen.boolean_and(left, right),
        BinaryOp::Or => gen.boolean_or(left, right),
    }
}

/// A statement node.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Literal template text, copied verbatim.
    Raw(String),
    /// `{expr}`: write the expression to the output. `escape` is false when
    /// the expression's filter chain ended in `|raw`.
    Output { expr: Expression, escape: bool },
    /// `{if ...}...{else}...{/if}`; `elseif` chains are nested else arms.
    If {
        condition: Expression,
        then_branch: Statements,
        else_branch: Option<Statements>,
    },
    /// `{foreach ...}...{foreachelse}...{/foreach}`.
    Foreach {
        source: Variable,
        key: Option<String>,
        value: String,
        body: Statements,
        else_branch: Option<Statements>,
    },
    /// `{assign expr to $name}` or `{$name = expr}`.
    Assign { name: String, expr: Expression },
}

impl Statement {
    fn generate(&self, gen: &mut dyn Generator) -> EmitResult {
        match self {
            Statement::Raw(text) => gen.raw(text),
            Statement::Output { expr, escape } => match expr.static_type() {
                ExprType::Value => gen.output(expr, *escape),
                _ => gen.write(expr),
            },
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => gen.condition(condition, then_branch, else_branch.as_ref()),
            Statement::Foreach {
                source,
                key,
                value,
                body,
                else_branch,
            } => gen.foreach(source, key.as_deref(), value, body, else_branch.as_ref()),
            Statement::Assign { name, expr } => gen.assign(name, expr),
        }
    }
}

/// An ordered sequence of statements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statements(pub Vec<Statement>);

impl Statements {
    /// Walks the statements in order, driving the generator.
    pub fn generate(&self, gen: &mut dyn Generator) -> EmitResult {
        for statement in &self.0 {
            statement.generate(gen)?;
        }
        Ok(())
    }

    /// Number of statements in this block.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the block holds no statements.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The root of a parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxTree {
    statements: Statements,
}

impl SyntaxTree {
    /// Wraps the root statement list.
    pub fn new(statements: Statements) -> Self {
        Self { statements }
    }

    /// Drives a generator over the whole tree.
    pub fn generate(&self, gen: &mut dyn Generator) -> EmitResult {
        self.statements.generate(gen)
    }

    /// The root statement list.
    pub fn statements(&self) -> &Statements {
        &self.statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_types() {
        let num = Expression::Literal(Literal::Integer(3));
        let s = Expression::Literal(Literal::String("x".into()));
        let var = Expression::Variable(Variable::Global { name: "v".into() });
        assert_eq!(num.static_type(), ExprType::Numeric);
        assert_eq!(s.static_type(), ExprType::String);
        assert_eq!(var.static_type(), ExprType::Value);

        let sum = Expression::Binary {
            op: BinaryOp::Plus,
            left: Box::new(num.clone()),
            right: Box::new(num),
        };
        assert_eq!(sum.static_type(), ExprType::Numeric);

        let cmp = Expression::Binary {
            op: BinaryOp::Equals,
            left: Box::new(sum.clone()),
            right: Box::new(sum),
        };
        assert_eq!(cmp.static_type(), ExprType::Boolean);
    }

    #[test]
    fn modifier_token_serialization() {
        let plain = ModifierCall::new("tolower".into(), vec![]);
        assert_eq!(plain.token, "tolower");

        let with_args = ModifierCall::new(
            "default".into(),
            vec![Literal::String("n/a".into()), Literal::Integer(3)],
        );
        assert_eq!(with_args.token, "default:\"n/a\",3");
    }
}
