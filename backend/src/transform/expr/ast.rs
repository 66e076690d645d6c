//! Expression syntax tree.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A value-producing node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal and the text it was written as.
    Number(f64, String),
    Text(String),
    Null,
    Field(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Case {
        arms: Vec<CaseArm>,
        otherwise: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseArm {
    pub condition: Condition,
    pub value: Expr,
}

/// A boolean node, only valid inside `WHEN`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        lhs: Expr,
        op: CompareOp,
        rhs: Expr,
    },
    IsNull {
        operand: Expr,
        negated: bool,
    },
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Expr {
    /// Field names referenced anywhere in this expression.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Field(name) => out.push(name),
            Expr::Number(..) | Expr::Text(_) | Expr::Null => {}
            Expr::Neg(inner) => inner.collect_fields(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_fields(out);
                rhs.collect_fields(out);
            }
            Expr::Case { arms, otherwise } => {
                for arm in arms {
                    arm.condition.collect_fields(out);
                    arm.value.collect_fields(out);
                }
                if let Some(e) = otherwise {
                    e.collect_fields(out);
                }
            }
        }
    }
}

impl Condition {
    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Compare { lhs, rhs, .. } => {
                lhs.collect_fields(out);
                rhs.collect_fields(out);
            }
            Condition::IsNull { operand, .. } => operand.collect_fields(out),
            Condition::Not(inner) => inner.collect_fields(out),
            Condition::And(a, b) | Condition::Or(a, b) => {
                a.collect_fields(out);
                b.collect_fields(out);
            }
        }
    }
}
