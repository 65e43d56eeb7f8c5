//! Macros used in the tuple-block

/// Call macro for all of the native types, the types whose value is stored inline in
/// the slot and can be read/written as a plain Rust value.
///
/// Tuple: {scalar variant name, native type, physical type variant}
#[macro_export]
macro_rules! for_all_native_types {
    ($macro:ident) => {
        $macro! {
            {Int8, i8, Int8},
            {Int16, i16, Int16},
            {Int32, i32, Int32},
            {Int64, i64, Int64},
            {Float32, f32, Float32},
            {Float64, f64, Float64}
        }
    };
}
