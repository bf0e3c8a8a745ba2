//! Abstract syntax tree for compiled expressions.

/// Number of parameter slots (`_a` through `_i`).
pub const PARAM_COUNT: usize = 9;

/// Maximum number of `lag()` calls in one expression.
pub const MAX_LAG_BUFFERS: usize = 10;

/// A compiled expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// Simulated time `t`
    Time,
    /// Current `timestep`
    TimeStep,
    /// Committed output of the owning element
    LastOutput,
    /// Parameter value `_a`..`_i`
    Param(usize),
    /// Previous committed parameter value `_lasta`..`_lasti`
    LastParam(usize),
    /// `dadt`..`didt`: rate of change of a parameter since the last commit
    Derivative(usize),
    /// Reference to a computed value or labeled node
    NodeRef(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
    /// `integrate(x)`: forward-Euler running integral
    Integrate(Box<Expr>),
    /// `diff(x)`: backward difference against the last committed input
    Diff(Box<Expr>),
    /// `last(name)`: converged value of a key from the previous timestep
    Last(String),
    /// `lag(x, delay)` with its history buffer slot
    Lag {
        input: Box<Expr>,
        delay: Box<Expr>,
        slot: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Built-in functions evaluated directly from their arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Abs,
    Exp,
    Log,
    Sqrt,
    Floor,
    Ceil,
    Tri,
    Saw,
    Min,
    Max,
    Mod,
    Pwr,
    Pwrs,
    Step,
    Select,
    Clamp,
    Pwl,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        let f = match name {
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "asin" => Self::Asin,
            "acos" => Self::Acos,
            "atan" => Self::Atan,
            "sinh" => Self::Sinh,
            "cosh" => Self::Cosh,
            "tanh" => Self::Tanh,
            "abs" => Self::Abs,
            "exp" => Self::Exp,
            "log" => Self::Log,
            "sqrt" => Self::Sqrt,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "tri" => Self::Tri,
            "saw" => Self::Saw,
            "min" => Self::Min,
            "max" => Self::Max,
            "mod" => Self::Mod,
            "pwr" => Self::Pwr,
            "pwrs" => Self::Pwrs,
            "step" => Self::Step,
            "select" => Self::Select,
            "clamp" => Self::Clamp,
            "pwl" => Self::Pwl,
            _ => return None,
        };
        Some(f)
    }

    /// Accepted argument counts as `(min, max)`; `None` means unbounded.
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::Min | Self::Max => (2, None),
            Self::Mod | Self::Pwr | Self::Pwrs => (2, Some(2)),
            Self::Step => (1, Some(2)),
            Self::Select | Self::Clamp => (3, Some(3)),
            Self::Pwl => (3, None),
            _ => (1, Some(1)),
        }
    }
}

impl Expr {
    /// Every identifier the expression reads from the outside world.
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::NodeRef(name) | Expr::Last(name) => out.push(name),
            Expr::Unary(_, a) | Expr::Integrate(a) | Expr::Diff(a) => a.collect_references(out),
            Expr::Binary(_, a, b) => {
                a.collect_references(out);
                b.collect_references(out);
            }
            Expr::Lag { input, delay, .. } => {
                input.collect_references(out);
                delay.collect_references(out);
            }
            Expr::Ternary(c, a, b) => {
                c.collect_references(out);
                a.collect_references(out);
                b.collect_references(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_references(out)),
            _ => {}
        }
    }
}
