mod access_mode;
mod accessor;
mod atomics;
mod class;
mod class_linker;
mod convert;
mod dispatch;
mod emulated_frame;
mod error;
mod frame;
mod heap;
mod interpreter;
mod method_handle;
mod method_type;
mod primitive;
mod runtime;
mod special;
mod value;
mod var_handle;

#[cfg(test)]
mod testing;

pub use access_mode::*;
pub use accessor::{check_array_index, check_element_index};
pub use atomics::*;
pub use class::*;
pub use class_linker::*;
pub use convert::{
    convert_argument_value, convert_primitive_value, convert_return_value, convert_value,
    is_method_type_convertible, is_parameter_convertible, is_return_convertible,
    perform_conversions,
};
pub use dispatch::{dispatch_call, dispatch_call_exact};
pub use emulated_frame::EmulatedStackFrame;
pub use error::*;
pub use frame::*;
pub use heap::*;
pub use interpreter::*;
pub use method_handle::*;
pub use method_type::*;
pub use primitive::Primitive;
pub use runtime::*;
pub use special::{BOXED_VALUE_OFFSET, SpecialClasses};
pub use value::*;
pub use var_handle::{VarHandle, VarHandleKind, access_variable};
