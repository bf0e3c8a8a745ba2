//! Expression evaluation.

use super::ast::{BinaryOp, Expr, Function, UnaryOp};
use super::state::ExprState;

/// Divisors smaller than this evaluate to zero instead of dividing.
pub const MIN_DIVISOR: f64 = 1e-12;

/// Where named references are looked up during evaluation.
pub trait VariableSource {
    /// Latest value of a computed key.
    fn computed_value(&self, name: &str) -> Option<f64>;
    /// Value of a computed key at the last converged timestep.
    fn converged_value(&self, name: &str) -> Option<f64>;
    /// Voltage of a labeled node.
    fn labeled_voltage(&self, label: &str) -> Option<f64>;
}

/// A source with no variables, for standalone evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVariables;

impl VariableSource for NoVariables {
    fn computed_value(&self, _name: &str) -> Option<f64> {
        None
    }

    fn converged_value(&self, _name: &str) -> Option<f64> {
        None
    }

    fn labeled_voltage(&self, _label: &str) -> Option<f64> {
        None
    }
}

/// Everything an evaluation reads besides the expression's own state.
#[derive(Clone, Copy)]
pub struct EvalEnv<'a> {
    pub time_step: f64,
    pub vars: &'a dyn VariableSource,
    /// Read computed values from the converged snapshot instead of the live map
    pub use_converged: bool,
}

impl<'a> EvalEnv<'a> {
    pub fn new(time_step: f64, vars: &'a dyn VariableSource) -> Self {
        Self {
            time_step,
            vars,
            use_converged: false,
        }
    }
}

impl Expr {
    /// Evaluate against `state` and `env`. Never fails: unknown names read
    /// as 0 and are recorded on the state.
    pub fn eval(&self, state: &mut ExprState, env: &EvalEnv<'_>) -> f64 {
        match self {
            Expr::Number(v) => *v,
            Expr::Time => state.t,
            Expr::TimeStep => env.time_step,
            Expr::LastOutput => state.last_output,
            Expr::Param(i) => state.values[*i],
            Expr::LastParam(i) => state.last_values[*i],
            Expr::Derivative(i) => {
                if env.time_step == 0.0 {
                    0.0
                } else {
                    (state.values[*i] - state.last_values[*i]) / env.time_step
                }
            }
            Expr::NodeRef(name) => resolve(name, state, env),
            Expr::Unary(UnaryOp::Neg, a) => -a.eval(state, env),
            Expr::Unary(UnaryOp::Not, a) => truth(a.eval(state, env) == 0.0),
            Expr::Binary(op, a, b) => eval_binary(*op, a, b, state, env),
            Expr::Ternary(c, a, b) => {
                if c.eval(state, env) != 0.0 {
                    a.eval(state, env)
                } else {
                    b.eval(state, env)
                }
            }
            Expr::Call(function, args) => eval_call(*function, args, state, env),
            Expr::Integrate(a) => {
                let input = a.eval(state, env);
                state.integrate(input, env.time_step)
            }
            Expr::Diff(a) => {
                let input = a.eval(state, env);
                state.diff(input, env.time_step)
            }
            Expr::Last(name) => env
                .vars
                .converged_value(name)
                .or_else(|| initial_value(name, env))
                .unwrap_or(0.0),
            Expr::Lag { input, delay, slot } => {
                let value = input.eval(state, env);
                let delay = delay.eval(state, env);
                match state.lag(*slot, value, delay) {
                    Some(v) => v,
                    None => match input.as_ref() {
                        Expr::NodeRef(name) => initial_value(name, env).unwrap_or(0.0),
                        _ => 0.0,
                    },
                }
            }
        }
    }
}

fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn resolve(name: &str, state: &mut ExprState, env: &EvalEnv<'_>) -> f64 {
    let computed = if env.use_converged {
        env.vars.converged_value(name)
    } else {
        env.vars.computed_value(name)
    };
    if let Some(v) = computed.or_else(|| env.vars.labeled_voltage(name)) {
        return v;
    }
    state.note_unresolved(name);
    0.0
}

/// `name_init`, then `nameinit`.
fn initial_value(name: &str, env: &EvalEnv<'_>) -> Option<f64> {
    env.vars
        .computed_value(&format!("{}_init", name))
        .or_else(|| env.vars.computed_value(&format!("{}init", name)))
}

fn eval_binary(op: BinaryOp, a: &Expr, b: &Expr, state: &mut ExprState, env: &EvalEnv<'_>) -> f64 {
    let x = a.eval(state, env);
    match op {
        BinaryOp::And => truth(x != 0.0 && b.eval(state, env) != 0.0),
        BinaryOp::Or => truth(x != 0.0 || b.eval(state, env) != 0.0),
        _ => apply_binary(op, x, b.eval(state, env)),
    }
}

fn apply_binary(op: BinaryOp, x: f64, y: f64) -> f64 {
    match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => {
            if y.abs() < MIN_DIVISOR {
                0.0
            } else {
                x / y
            }
        }
        BinaryOp::Pow => x.powf(y),
        BinaryOp::Eq => truth(x == y),
        BinaryOp::Ne => truth(x != y),
        BinaryOp::Lt => truth(x < y),
        BinaryOp::Le => truth(x <= y),
        BinaryOp::Gt => truth(x > y),
        BinaryOp::Ge => truth(x >= y),
        BinaryOp::And => truth(x != 0.0 && y != 0.0),
        BinaryOp::Or => truth(x != 0.0 || y != 0.0),
    }
}

fn posmod(x: f64, y: f64) -> f64 {
    let r = x % y;
    if r >= 0.0 {
        r
    } else {
        r + y
    }
}

fn eval_call(function: Function, args: &[Expr], state: &mut ExprState, env: &EvalEnv<'_>) -> f64 {
    let mut arg = |i: usize| args.get(i).map(|e| e.eval(state, env)).unwrap_or(0.0);

    match function {
        Function::Sin => arg(0).sin(),
        Function::Cos => arg(0).cos(),
        Function::Tan => arg(0).tan(),
        Function::Asin => arg(0).asin(),
        Function::Acos => arg(0).acos(),
        Function::Atan => arg(0).atan(),
        Function::Sinh => arg(0).sinh(),
        Function::Cosh => arg(0).cosh(),
        Function::Tanh => arg(0).tanh(),
        Function::Abs => arg(0).abs(),
        Function::Exp => arg(0).exp(),
        Function::Log => arg(0).ln(),
        Function::Sqrt => arg(0).sqrt(),
        Function::Floor => arg(0).floor(),
        Function::Ceil => arg(0).ceil(),
        Function::Tri => {
            let x = posmod(arg(0), std::f64::consts::TAU) / std::f64::consts::PI;
            if x < 1.0 {
                -1.0 + x * 2.0
            } else {
                3.0 - x * 2.0
            }
        }
        Function::Saw => posmod(arg(0), std::f64::consts::TAU) / std::f64::consts::PI - 1.0,
        Function::Min => (1..args.len()).fold(arg(0), |m, i| m.min(arg(i))),
        Function::Max => (1..args.len()).fold(arg(0), |m, i| m.max(arg(i))),
        Function::Mod => {
            let x = arg(0);
            let divisor = arg(1);
            if divisor.abs() < MIN_DIVISOR {
                0.0
            } else {
                x % divisor
            }
        }
        Function::Pwr => {
            let x = arg(0);
            x.abs().powf(arg(1))
        }
        Function::Pwrs => {
            let x = arg(0);
            let p = arg(1);
            if x < 0.0 {
                -(-x).powf(p)
            } else {
                x.powf(p)
            }
        }
        Function::Step => {
            let x = arg(0);
            if args.len() < 2 {
                truth(x >= 0.0)
            } else {
                let limit = arg(1);
                truth(x <= limit && x >= 0.0)
            }
        }
        Function::Select => {
            if arg(0) > 0.0 {
                arg(2)
            } else {
                arg(1)
            }
        }
        Function::Clamp => {
            let x = arg(0);
            let lo = arg(1);
            let hi = arg(2);
            x.max(lo).min(hi)
        }
        Function::Pwl => pwl(args, state, env),
    }
}

/// Piecewise-linear lookup `pwl(x, x0, y0, x1, y1, ...)`. Missing leading
/// arguments read as 0.
fn pwl(args: &[Expr], state: &mut ExprState, env: &EvalEnv<'_>) -> f64 {
    let mut arg = |i: usize| args.get(i).map(|e| e.eval(state, env)).unwrap_or(0.0);
    let x = arg(0);
    let mut x0 = arg(1);
    let mut y0 = arg(2);
    if x < x0 {
        return y0;
    }
    let mut i = 3;
    while i + 1 < args.len() {
        let x1 = arg(i);
        let y1 = arg(i + 1);
        if x < x1 {
            if x1 == x0 {
                return y1;
            }
            return y0 + (x - x0) * (y1 - y0) / (x1 - x0);
        }
        x0 = x1;
        y0 = y1;
        i += 2;
    }
    y0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(function: Function, args: Vec<Expr>) -> f64 {
        let mut state = ExprState::new();
        Expr::Call(function, args).eval(&mut state, &EvalEnv::new(0.1, &NoVariables))
    }

    #[test]
    fn test_pwl_with_short_argument_list() {
        assert_eq!(call(Function::Pwl, vec![]), 0.0);
        assert_eq!(call(Function::Pwl, vec![Expr::Number(-1.0)]), 0.0);
        assert_eq!(call(Function::Pwl, vec![Expr::Number(2.0), Expr::Number(1.0)]), 0.0);
    }

    #[test]
    fn test_pwl_interpolates() {
        let points = |x: f64| [x, 0.0, 0.0, 2.0, 4.0].map(Expr::Number).to_vec();
        assert_eq!(call(Function::Pwl, points(1.0)), 2.0);
        assert_eq!(call(Function::Pwl, points(5.0)), 4.0);
        assert_eq!(call(Function::Pwl, points(-1.0)), 0.0);
    }
}
