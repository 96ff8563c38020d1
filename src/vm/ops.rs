//! The instruction set.
//!
//! An instruction is an immediate word: opcode in the low byte of the payload,
//! operand above it. Some instructions also consume the word that follows them
//! in the code vector (`QUOTE`, `BIND`, `SET`, `ARG`, `BINDARG`, `REST`, `KEY`,
//! `LAMBDA`, `MACRO`).
//!
//! The opcodes from `Add` on are builtins: first-class values with a fixed arity,
//! callable directly by name or applied at run time.

use crate::data::Value;

macro_rules! opcodes {
    ($($op:ident => $name:literal,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(u8)]
        pub enum Op {
            $($op,)*
        }

        impl Op {
            const ALL: &'static [Op] = &[$(Op::$op,)*];

            /// Mnemonic, or the Lisp name for builtins.
            pub fn name(self) -> &'static str {
                match self {
                    $(Op::$op => $name,)*
                }
            }
        }
    };
}

opcodes! {
    Dup => "dup",
    Pop => "pop",
    Swap => "swap",
    Quote => "quote",
    Frame => "frame",
    PushEnv => "pushenv",
    PopEnv => "popenv",
    Bind => "bind",
    Set => "set",
    Lookup => "lookup",
    Arg => "arg",
    BindArg => "bindarg",
    Rest => "rest",
    Key => "key",
    ArgEnd => "argend",
    Br => "br",
    Brb => "brb",
    Brn => "brn",
    Ret => "ret",
    Halt => "halt",
    Ap => "ap",
    Expand => "expand",
    Lambda => "lambda",
    Macro => "macro",
    MacroP => "macrop",

    Add => "+",
    Sub => "-",
    Mul => "*",
    Div => "/",
    Mod => "mod",
    Lt => "<",
    Gt => ">",
    Le => "<=",
    Ge => ">=",
    NumEq => "=",
    Eq => "eq",
    Equal => "equal",
    Not => "not",
    Null => "null",
    Consp => "consp",
    Cons => "cons",
    Car => "car",
    Cdr => "cdr",
    Rplaca => "rplaca",
    Rplacd => "rplacd",
    Append => "append",
    MakeVector => "make-vector",
    Vget => "vget",
    Vset => "vset",
    Vpush => "vpush",
    Vpop => "vpop",
    Vsize => "vsize",
    Vallocsize => "vallocsize",
    PrStr => "pr-str",
    Print => "print",
    Princ => "princ",
    Read => "read",
    Intern => "intern",
    SymbolName => "symbol-name",
    Eval => "eval",
    Compile => "compile",
    Exec => "exec",
    Throw => "throw",
    TypeOf => "type-of",
    Gc => "gc",
    MakeError => "error",
    ErrorCause => "error-cause",
    ErrorPositions => "error-positions",
}

/// Builtins and their arities, in opcode order.
pub const BUILTINS: &[(Op, usize)] = &[
    (Op::Add, 2),
    (Op::Sub, 2),
    (Op::Mul, 2),
    (Op::Div, 2),
    (Op::Mod, 2),
    (Op::Lt, 2),
    (Op::Gt, 2),
    (Op::Le, 2),
    (Op::Ge, 2),
    (Op::NumEq, 2),
    (Op::Eq, 2),
    (Op::Equal, 2),
    (Op::Not, 1),
    (Op::Null, 1),
    (Op::Consp, 1),
    (Op::Cons, 2),
    (Op::Car, 1),
    (Op::Cdr, 1),
    (Op::Rplaca, 2),
    (Op::Rplacd, 2),
    (Op::Append, 2),
    (Op::MakeVector, 1),
    (Op::Vget, 2),
    (Op::Vset, 3),
    (Op::Vpush, 2),
    (Op::Vpop, 1),
    (Op::Vsize, 1),
    (Op::Vallocsize, 1),
    (Op::PrStr, 1),
    (Op::Print, 1),
    (Op::Princ, 1),
    (Op::Read, 1),
    (Op::Intern, 1),
    (Op::SymbolName, 1),
    (Op::Eval, 1),
    (Op::Compile, 1),
    (Op::Exec, 1),
    (Op::Throw, 1),
    (Op::TypeOf, 1),
    (Op::Gc, 0),
    (Op::MakeError, 2),
    (Op::ErrorCause, 1),
    (Op::ErrorPositions, 1),
];

impl Op {
    pub fn from_u8(b: u8) -> Option<Op> {
        Op::ALL.get(b as usize).copied()
    }

    /// Arity, if this opcode is a builtin.
    pub fn arity(self) -> Option<usize> {
        BUILTINS
            .iter()
            .find(|(op, _)| *op == self)
            .map(|(_, arity)| *arity)
    }

    pub fn is_builtin(self) -> bool {
        self >= Op::Add
    }

    /// The builtin named `name`.
    pub fn builtin(name: &str) -> Option<Op> {
        BUILTINS
            .iter()
            .map(|(op, _)| *op)
            .find(|op| op.name() == name)
    }

    pub fn word(self) -> Value {
        self.with(0)
    }

    pub fn with(self, operand: u64) -> Value {
        Value::instr(self as u8, operand)
    }

    /// Decode an instruction word.
    pub fn decode(v: Value) -> Option<(Op, u64)> {
        let (op, operand) = v.as_instr()?;
        Some((Op::from_u8(op)?, operand))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_are_dense() {
        for (i, op) in Op::ALL.iter().enumerate() {
            assert_eq!(*op as usize, i);
            assert_eq!(Op::from_u8(i as u8), Some(*op));
        }
        assert_eq!(Op::from_u8(Op::ALL.len() as u8), None);
    }

    #[test]
    fn every_builtin_has_an_arity() {
        let builtins: Vec<Op> = Op::ALL.iter().copied().filter(|op| op.is_builtin()).collect();
        assert_eq!(builtins.len(), BUILTINS.len());
        for (op, (table_op, _)) in builtins.iter().zip(BUILTINS) {
            assert_eq!(op, table_op, "builtin table out of opcode order");
        }
        assert_eq!(Op::Dup.arity(), None);
        assert_eq!(Op::Vset.arity(), Some(3));
    }

    #[test]
    fn builtins_by_name() {
        assert_eq!(Op::builtin("car"), Some(Op::Car));
        assert_eq!(Op::builtin("make-vector"), Some(Op::MakeVector));
        assert_eq!(Op::builtin("dup"), None);
        assert_eq!(Op::builtin("nonesuch"), None);
    }

    #[test]
    fn words_decode() {
        assert_eq!(Op::decode(Op::Brb.with(7)), Some((Op::Brb, 7)));
        assert_eq!(Op::decode(Value::int(3)), None);
    }
}
