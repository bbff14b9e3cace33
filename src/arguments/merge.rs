//! Reconciles the collected evidence into the final argument list.
//!
//! Instrumentation wins when present. Otherwise the declared parameters decide which register
//! or stack slot supplies each value. Without a prototype the values are listed positionally:
//! integer registers, then floating point registers, then stack slots.

use tracing::{debug, warn};

use super::{ArgValue, CallArguments, TypedArgument};
use crate::arch::Abi;
use crate::prototype::{class_pointer_type, SymbolKind};

fn is_floating(type_name: &str) -> bool {
    matches!(type_name, "double" | "float")
}

/// Everything besides the evidence that the merge depends on
#[derive(Debug, Clone)]
pub struct MergeInput<'a> {
    /// Parameter types of the demangled prototype, without `this`
    pub prototype: Option<Vec<String>>,
    /// Qualified function name, `None` for unknown symbols
    pub function: Option<&'a str>,
    pub kind: SymbolKind,
    pub abi: Abi,
    /// How many values to show for functions without a prototype
    pub stack_arguments: usize,
    pub full_stack: bool,
}

impl MergeInput<'_> {
    /// Fills `args.merged` and tells whether the first argument is a `this` pointer
    pub fn merge(&self, args: &mut CallArguments) -> bool {
        let mut types = self.prototype.clone();
        let method = self.detect_method(args, types.as_mut());

        args.merged = if !args.instrumented.is_empty() {
            self.from_instrumentation(args, types.as_deref())
        } else if let Some(types) = &types {
            self.from_prototype(args, types)
        } else {
            self.positional(args)
        };

        method
    }

    /// Inserts the class pointer type as the first parameter when the function is a method
    fn detect_method(&self, args: &CallArguments, types: Option<&mut Vec<String>>) -> bool {
        let Some(function) = self.function else {
            return false;
        };
        let ints = args.int_registers.len();
        let floats = args.float_registers.len();

        let (method, assumed) = match self.kind {
            SymbolKind::Unknown if ints >= self.abi.max_int_registers => (true, true),
            SymbolKind::Method => (true, false),
            SymbolKind::Unknown => {
                let declared = types.as_ref().map(|types| types.len());
                (declared.is_some_and(|count| ints + floats == count + 1), false)
            }
        };
        if !method {
            return false;
        }

        let Some(class) = class_pointer_type(function) else {
            return false;
        };
        debug!("Adding argument 0 as C++ class {class}");
        if let Some(types) = types {
            types.insert(0, class);
        }

        if assumed && self.full_stack {
            warn!("Assuming {function} is a C++ method. If this is incorrect, arguments will be offset by 1.");
        } else if assumed {
            debug!("Assuming {function} is a C++ method. If this is incorrect, arguments will be offset by 1.");
        }
        true
    }

    fn from_instrumentation(&self, args: &CallArguments, types: Option<&[String]>) -> Vec<TypedArgument> {
        let Some(types) = types else {
            return args
                .instrumented
                .iter()
                .copied()
                .map(TypedArgument::untyped)
                .collect();
        };

        if types.len() != args.instrumented.len() {
            warn!(
                "Instrumented argument count ({}) doesn't match prototype ({})",
                args.instrumented.len(),
                types.len()
            );
        }

        types
            .iter()
            .enumerate()
            .map(|(i, type_name)| {
                let value = match args.instrumented.get(i) {
                    Some(value) if is_floating(type_name) => value.into_float(),
                    Some(value) => *value,
                    None => ArgValue::unknown(),
                };
                TypedArgument::new(type_name.as_str(), value)
            })
            .collect()
    }

    fn from_prototype(&self, args: &CallArguments, types: &[String]) -> Vec<TypedArgument> {
        let abi = self.abi;
        let mut int = 0;
        let mut float = 0;
        let mut stack = 0;

        types
            .iter()
            .map(|type_name| {
                let value = if is_floating(type_name) {
                    let value = if let Some(value) = args.float_registers.get(float) {
                        *value
                    } else if float >= abi.max_float_registers {
                        let (value, used) = self.float_from_stack(args, stack, type_name);
                        stack += used;
                        value
                    } else {
                        debug!(
                            "Not enough float arguments to match prototype. We only have {}",
                            args.float_registers.len()
                        );
                        ArgValue::unknown()
                    };
                    float += 1;
                    value
                } else {
                    let value = if let Some(value) = args.int_registers.get(int) {
                        *value
                    } else if int >= abi.max_int_registers && stack < args.stack.len() {
                        stack += 1;
                        args.stack[stack - 1]
                    } else {
                        debug!(
                            "Not enough int arguments to match prototype. We only have {}",
                            args.int_registers.len()
                        );
                        ArgValue::unknown()
                    };
                    int += 1;
                    value
                };
                TypedArgument::new(type_name.as_str(), value)
            })
            .collect()
    }

    /// A floating point parameter passed on the stack and the number of slots it used
    ///
    /// On 32-bit ABIs a `double` is split over two slots, its bytes are put back together as
    /// they were, without any numeric conversion.
    fn float_from_stack(&self, args: &CallArguments, slot: usize, type_name: &str) -> (ArgValue, usize) {
        let double = type_name == "double";
        let slots = if double && self.abi.splits_doubles() { 2 } else { 1 };
        let Some(parts) = args.stack.get(slot..slot + slots) else {
            debug!("Not enough stack arguments for {type_name} parameter at slot {slot}");
            return (ArgValue::unknown(), 0);
        };
        if parts.iter().any(ArgValue::is_unknown) {
            return (ArgValue::unknown(), slots);
        }

        let raw: Vec<u8> = parts.iter().flat_map(|part| part.raw().iter().copied()).collect();
        let width = if double { 8 } else { 4 };
        let value = raw.get(..width).map_or_else(ArgValue::unknown, ArgValue::float);
        (value, slots)
    }

    fn positional(&self, args: &CallArguments) -> Vec<TypedArgument> {
        if !args.float_registers.is_empty() && self.full_stack {
            warn!("Unable to correctly order arguments. Integer types will be displayed first followed by floating point types");
        }

        let mut merged: Vec<TypedArgument> = args
            .int_registers
            .iter()
            .chain(&args.float_registers)
            .copied()
            .map(TypedArgument::untyped)
            .collect();

        if args.int_registers.len() >= self.abi.max_int_registers
            || args.float_registers.len() >= self.abi.max_float_registers
        {
            let room = self.stack_arguments.saturating_sub(merged.len());
            merged.extend(args.stack.iter().take(room).copied().map(TypedArgument::untyped));
        }
        merged
    }
}
