//! The evaluator: function-eval queueing, expression parsing, member
//! walking, literal construction and decimal formatting (spec §4.4).

pub mod decimal;
pub mod expr;
pub mod literal;
pub mod queue;
pub mod resolve;
pub mod walk;

pub use decimal::{format_decimal, parse_decimal, DecimalBits};
pub use expr::{parse as parse_expression, ParsedExpression, PathSegment};
pub use literal::{construct_literal, LiteralRequest};
pub use queue::{EvalOutcome, FunctionEvalQueue};
pub use resolve::{frame_location, local_candidate_name, resolve, resume, Resolution};
pub use walk::{walk_members, Member, MemberKind};
