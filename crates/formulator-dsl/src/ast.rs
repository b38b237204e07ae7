//! Typed AST for procedures.

use crate::value::Value;

/// A parsed, callable procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub params: Vec<String>,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// `x => expr`
    Expr(Expr),
    /// `x => { ... }` / `function (x) { ... }`
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Declare {
        name: String,
        constant: bool,
        init: Option<Expr>,
    },
    Assign {
        name: String,
        op: AssignOp,
        value: Expr,
    },
    If {
        test: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    Return(Option<Expr>),
    Throw(Expr),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Template(Vec<TemplatePart>),
    Array(Vec<Expr>),
    Ident(String),
    Member {
        object: Box<Expr>,
        property: Property,
        optional: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        class: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Name(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    And,
    Or,
    Nullish,
}

/// How parent values are passed to a procedure's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Parameter `i` receives parent value `i`.
    Positional,
    /// The single parameter receives a record keyed by parent name.
    Row,
}

impl Procedure {
    /// Decide how `parent_names` bind to this procedure's parameters.
    ///
    /// A single parameter binds to a row record when there are several
    /// parents, or when the body reads `param.<parent name>`; otherwise
    /// parameters bind positionally.
    pub fn binding_for(&self, parent_names: &[String]) -> Binding {
        if self.params.len() != 1 {
            return Binding::Positional;
        }
        if parent_names.len() > 1 {
            return Binding::Row;
        }
        let param = &self.params[0];
        let mut reads_row_field = false;
        self.visit_exprs(&mut |expr| {
            if let Expr::Member {
                object,
                property: Property::Name(name),
                ..
            } = expr
            {
                if matches!(object.as_ref(), Expr::Ident(id) if id == param)
                    && parent_names.iter().any(|p| p == name)
                {
                    reads_row_field = true;
                }
            }
        });
        if reads_row_field {
            Binding::Row
        } else {
            Binding::Positional
        }
    }

    /// Visit every expression node in the body (pre-order).
    pub fn visit_exprs(&self, f: &mut dyn FnMut(&Expr)) {
        let mut stack: Vec<&Expr> = Vec::new();
        match &self.body {
            Body::Expr(e) => stack.push(e),
            Body::Block(stmts) => push_stmt_exprs(stmts, &mut stack),
        }
        while let Some(expr) = stack.pop() {
            f(expr);
            match expr {
                Expr::Literal(_) | Expr::Ident(_) => {}
                Expr::Template(parts) => {
                    for part in parts {
                        if let TemplatePart::Expr(e) = part {
                            stack.push(e);
                        }
                    }
                }
                Expr::Array(items) => stack.extend(items.iter()),
                Expr::Member {
                    object, property, ..
                } => {
                    stack.push(object);
                    if let Property::Computed(e) = property {
                        stack.push(e);
                    }
                }
                Expr::Call { callee, args } => {
                    stack.push(callee);
                    stack.extend(args.iter());
                }
                Expr::New { args, .. } => stack.extend(args.iter()),
                Expr::Unary { operand, .. } => stack.push(operand),
                Expr::Binary { lhs, rhs, .. } => {
                    stack.push(lhs);
                    stack.push(rhs);
                }
                Expr::Conditional {
                    test,
                    consequent,
                    alternate,
                } => {
                    stack.push(test);
                    stack.push(consequent);
                    stack.push(alternate);
                }
            }
        }
    }
}

fn push_stmt_exprs<'a>(stmts: &'a [Stmt], stack: &mut Vec<&'a Expr>) {
    for stmt in stmts {
        match stmt {
            Stmt::Declare { init, .. } => stack.extend(init.iter()),
            Stmt::Assign { value, .. } => stack.push(value),
            Stmt::If {
                test,
                then,
                otherwise,
            } => {
                stack.push(test);
                push_stmt_exprs(then, stack);
                push_stmt_exprs(otherwise, stack);
            }
            Stmt::Return(value) => stack.extend(value.iter()),
            Stmt::Throw(value) | Stmt::Expr(value) => stack.push(value),
        }
    }
}
