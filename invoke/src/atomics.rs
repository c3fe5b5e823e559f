use std::sync::atomic::{
    AtomicI8, AtomicI16, AtomicI32, AtomicI64, AtomicU8, AtomicU16, AtomicU32, Ordering,
};

use crate::{Primitive, bits_to_double, bits_to_float};

/// A fixed-width integer that can be accessed atomically in place.
///
/// Every slot in the heap is read and written through one of these, floats
/// and doubles through their 32 and 64-bit integer bits.
///
/// # Safety
/// Implementors must have an atomic counterpart of identical size and
/// alignment, which the `unsafe fn`s below operate through.
pub unsafe trait Scalar: Copy + PartialEq + Eq + Send + Sync + std::fmt::Debug + 'static {
    const SIZE: usize;

    /// Truncates `bits` to the width of `Self`.
    fn from_bits(bits: u64) -> Self;
    fn to_bits(self) -> u64;
    fn swap_bytes(self) -> Self;
    fn wrapping_add(self, rhs: Self) -> Self;
    fn from_ne_slice(bytes: &[u8]) -> Self;
    fn write_ne_slice(self, out: &mut [u8]);

    /// # Safety
    /// `ptr` must be valid for reads and writes of `Self::SIZE` bytes and
    /// aligned to `Self::SIZE` for the duration of the call.
    unsafe fn load(ptr: *mut Self, order: Ordering) -> Self;
    /// # Safety
    /// See [`Scalar::load`].
    unsafe fn store(ptr: *mut Self, value: Self, order: Ordering);
    /// # Safety
    /// See [`Scalar::load`].
    unsafe fn swap(ptr: *mut Self, value: Self, order: Ordering) -> Self;
    /// # Safety
    /// See [`Scalar::load`].
    unsafe fn compare_exchange(
        ptr: *mut Self,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;
    /// # Safety
    /// See [`Scalar::load`].
    unsafe fn compare_exchange_weak(
        ptr: *mut Self,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;
    /// # Safety
    /// See [`Scalar::load`].
    unsafe fn fetch_add(ptr: *mut Self, value: Self, order: Ordering) -> Self;
    /// # Safety
    /// See [`Scalar::load`].
    unsafe fn fetch_or(ptr: *mut Self, value: Self, order: Ordering) -> Self;
    /// # Safety
    /// See [`Scalar::load`].
    unsafe fn fetch_and(ptr: *mut Self, value: Self, order: Ordering) -> Self;
    /// # Safety
    /// See [`Scalar::load`].
    unsafe fn fetch_xor(ptr: *mut Self, value: Self, order: Ordering) -> Self;
}

macro_rules! scalar {
    ($int:ty, $atomic:ty) => {
        // SAFETY: `$atomic` has the same size and alignment as `$int`.
        unsafe impl Scalar for $int {
            const SIZE: usize = std::mem::size_of::<$int>();

            #[inline]
            fn from_bits(bits: u64) -> Self {
                bits as $int
            }

            #[inline]
            fn to_bits(self) -> u64 {
                self as u64
            }

            #[inline]
            fn swap_bytes(self) -> Self {
                <$int>::swap_bytes(self)
            }

            #[inline]
            fn wrapping_add(self, rhs: Self) -> Self {
                <$int>::wrapping_add(self, rhs)
            }

            fn from_ne_slice(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$int>()];
                raw.copy_from_slice(&bytes[..Self::SIZE]);
                <$int>::from_ne_bytes(raw)
            }

            fn write_ne_slice(self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_ne_bytes());
            }

            #[inline]
            unsafe fn load(ptr: *mut Self, order: Ordering) -> Self {
                // SAFETY: upheld by the caller
                unsafe { <$atomic>::from_ptr(ptr) }.load(order)
            }

            #[inline]
            unsafe fn store(ptr: *mut Self, value: Self, order: Ordering) {
                // SAFETY: upheld by the caller
                unsafe { <$atomic>::from_ptr(ptr) }.store(value, order)
            }

            #[inline]
            unsafe fn swap(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                // SAFETY: upheld by the caller
                unsafe { <$atomic>::from_ptr(ptr) }.swap(value, order)
            }

            #[inline]
            unsafe fn compare_exchange(
                ptr: *mut Self,
                current: Self,
                new: Self,
                success: Ordering,
                failure: Ordering,
            ) -> Result<Self, Self> {
                // SAFETY: upheld by the caller
                unsafe { <$atomic>::from_ptr(ptr) }.compare_exchange(current, new, success, failure)
            }

            #[inline]
            unsafe fn compare_exchange_weak(
                ptr: *mut Self,
                current: Self,
                new: Self,
                success: Ordering,
                failure: Ordering,
            ) -> Result<Self, Self> {
                // SAFETY: upheld by the caller
                unsafe { <$atomic>::from_ptr(ptr) }
                    .compare_exchange_weak(current, new, success, failure)
            }

            #[inline]
            unsafe fn fetch_add(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                // SAFETY: upheld by the caller
                unsafe { <$atomic>::from_ptr(ptr) }.fetch_add(value, order)
            }

            #[inline]
            unsafe fn fetch_or(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                // SAFETY: upheld by the caller
                unsafe { <$atomic>::from_ptr(ptr) }.fetch_or(value, order)
            }

            #[inline]
            unsafe fn fetch_and(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                // SAFETY: upheld by the caller
                unsafe { <$atomic>::from_ptr(ptr) }.fetch_and(value, order)
            }

            #[inline]
            unsafe fn fetch_xor(ptr: *mut Self, value: Self, order: Ordering) -> Self {
                // SAFETY: upheld by the caller
                unsafe { <$atomic>::from_ptr(ptr) }.fetch_xor(value, order)
            }
        }
    };
}

scalar!(u8, AtomicU8);
scalar!(i8, AtomicI8);
scalar!(u16, AtomicU16);
scalar!(i16, AtomicI16);
scalar!(u32, AtomicU32);
scalar!(i32, AtomicI32);
scalar!(i64, AtomicI64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitwiseOp {
    Or,
    And,
    Xor,
}

/// Adds two raw values of `kind`. Floating point kinds are added as
/// floats, everything else wraps.
#[must_use]
pub fn add_raw<T: Scalar>(kind: Primitive, lhs: T, rhs: T) -> T {
    match kind {
        Primitive::Float => {
            let sum = bits_to_float(lhs.to_bits() as u32) + bits_to_float(rhs.to_bits() as u32);
            T::from_bits(u64::from(sum.to_bits()))
        }
        Primitive::Double => {
            let sum = bits_to_double(lhs.to_bits()) + bits_to_double(rhs.to_bits());
            T::from_bits(sum.to_bits())
        }
        _ => lhs.wrapping_add(rhs),
    }
}

/// Atomically adds `operand` and returns the previous value in native byte
/// order.
///
/// Integral kinds in native order use the hardware fetch-add; floating point
/// kinds and byte-swapped slots retry a compare-and-swap until it sticks.
///
/// # Safety
/// See [`Scalar::load`].
pub unsafe fn get_and_add<T: Scalar>(
    ptr: *mut T,
    kind: Primitive,
    operand: T,
    byte_swap: bool,
    success: Ordering,
    failure: Ordering,
) -> T {
    if kind.is_integral() && !byte_swap {
        // SAFETY: upheld by the caller
        return unsafe { T::fetch_add(ptr, operand, success) };
    }

    // SAFETY: upheld by the caller
    let mut current = unsafe { T::load(ptr, Ordering::Relaxed) };
    loop {
        let old = if byte_swap { current.swap_bytes() } else { current };
        let sum = add_raw(kind, old, operand);
        let new = if byte_swap { sum.swap_bytes() } else { sum };
        // SAFETY: upheld by the caller
        match unsafe { T::compare_exchange_weak(ptr, current, new, success, failure) } {
            Ok(_) => return old,
            Err(actual) => current = actual,
        }
    }
}

/// Atomically applies a bitwise operation and returns the previous value in
/// native byte order.
///
/// Bitwise operations commute with byte swapping, so a swapped slot only
/// needs its operand and result swapped.
///
/// # Safety
/// See [`Scalar::load`].
pub unsafe fn get_and_bitwise<T: Scalar>(
    ptr: *mut T,
    op: BitwiseOp,
    operand: T,
    byte_swap: bool,
    order: Ordering,
) -> T {
    let operand = if byte_swap { operand.swap_bytes() } else { operand };
    // SAFETY: upheld by the caller
    let old = unsafe {
        match op {
            BitwiseOp::Or => T::fetch_or(ptr, operand, order),
            BitwiseOp::And => T::fetch_and(ptr, operand, order),
            BitwiseOp::Xor => T::fetch_xor(ptr, operand, order),
        }
    };
    if byte_swap { old.swap_bytes() } else { old }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::UnsafeCell;

    #[test]
    fn float_add_goes_through_bits() {
        let cell = UnsafeCell::new(1.5f32.to_bits() as i32);
        let operand = 2.25f32.to_bits() as i32;
        let old = unsafe {
            get_and_add(
                cell.get(),
                Primitive::Float,
                operand,
                false,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
        };
        assert_eq!(f32::from_bits(old as u32), 1.5);
        assert_eq!(f32::from_bits(cell.into_inner() as u32), 3.75);
    }

    #[test]
    fn swapped_add_is_performed_in_native_order() {
        let cell = UnsafeCell::new(0x00ffi16.swap_bytes());
        let old = unsafe {
            get_and_add(
                cell.get(),
                Primitive::Short,
                1i16,
                true,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
        };
        assert_eq!(old, 0x00ff);
        assert_eq!(cell.into_inner().swap_bytes(), 0x0100);
    }

    #[test]
    fn swapped_bitwise_matches_native() {
        let cell = UnsafeCell::new(0x1234_5678i32.swap_bytes());
        let old = unsafe {
            get_and_bitwise(cell.get(), BitwiseOp::Xor, 0x0f0f_0f0f, true, Ordering::SeqCst)
        };
        assert_eq!(old, 0x1234_5678);
        assert_eq!(cell.into_inner().swap_bytes(), 0x1234_5678 ^ 0x0f0f_0f0f);
    }

    #[test]
    fn byte_slices_round_trip() {
        let mut buf = [0u8; 8];
        0x0102_0304i32.write_ne_slice(&mut buf[2..]);
        assert_eq!(i32::from_ne_slice(&buf[2..6]), 0x0102_0304);
    }
}
