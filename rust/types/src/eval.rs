use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// An expression over the columns of one record, used by `eval(...)` measures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EvalExpr {
    Field(String),
    Number(f64),
    Text(String),
    Arith {
        op: ArithOp,
        lhs: Box<EvalExpr>,
        rhs: Box<EvalExpr>,
    },
    Compare {
        op: CompareOp,
        lhs: Box<EvalExpr>,
        rhs: Box<EvalExpr>,
    },
}

impl EvalExpr {
    pub fn field(name: impl Into<String>) -> Self {
        EvalExpr::Field(name.into())
    }

    pub fn arith(op: ArithOp, lhs: EvalExpr, rhs: EvalExpr) -> Self {
        EvalExpr::Arith {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn compare(op: CompareOp, lhs: EvalExpr, rhs: EvalExpr) -> Self {
        EvalExpr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Columns referenced by the expression, in first-use order, without duplicates.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            EvalExpr::Field(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            EvalExpr::Number(_) | EvalExpr::Text(_) => {}
            EvalExpr::Arith { lhs, rhs, .. } | EvalExpr::Compare { lhs, rhs, .. } => {
                lhs.collect_fields(out);
                rhs.collect_fields(out);
            }
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        })
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        })
    }
}

impl fmt::Display for EvalExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalExpr::Field(name) => f.write_str(name),
            EvalExpr::Number(v) => write!(f, "{v}"),
            EvalExpr::Text(s) => write!(f, "\"{s}\""),
            EvalExpr::Arith { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            EvalExpr::Compare { op, lhs, rhs } => write!(f, "{lhs} {op} {rhs}"),
        }
    }
}
