//! Primitive-to-primitive conversions
//!
//! A single `CAST_VALUE` opcode covers every supported conversion between
//! primitive representations; its parameter is a [`BaseCastType`] naming the
//! exact `(source, target)` pair. Integer widening distinguishes zero- from
//! sign-extension, so the frontend's signedness decision is baked into the
//! opcode stream.

use num_enum::TryFromPrimitive;

use super::base_type::{BaseType, DataType};

/// Identifies one supported primitive-to-primitive conversion.
///
/// Discriminant layout for integer-to-integer casts:
/// - bits 0-1: target width (log2 of the byte count)
/// - bits 4-5: source width (log2 of the byte count)
/// - bit 7: set when the value is sign-extended
///
/// Float-involved casts occupy the `0x4x..0x7x` and `0xCx..0xFx` ranges with
/// their low bits pinned to `0b11`. The constant-folding peephole inspects
/// only bits 0-1 and 7 of this value; the layout keeps that inspection a
/// no-op for every float-involved cast.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum BaseCastType {
    // Cast down (signed or unsigned makes no difference here)
    /// 16-bit integer truncated to 8 bits
    Int16To8 = 0x10,
    /// 32-bit integer truncated to 8 bits
    Int32To8 = 0x20,
    /// 64-bit integer truncated to 8 bits
    Int64To8 = 0x30,
    /// 32-bit integer truncated to 16 bits
    Int32To16 = 0x21,
    /// 64-bit integer truncated to 16 bits
    Int64To16 = 0x31,
    /// 64-bit integer truncated to 32 bits
    Int64To32 = 0x32,

    // Cast up (value is unsigned, widened with zeroes)
    /// Unsigned 8-bit widened to 16 bits
    Uint8To16 = 0x01,
    /// Unsigned 8-bit widened to 32 bits
    Uint8To32 = 0x02,
    /// Unsigned 8-bit widened to 64 bits
    Uint8To64 = 0x03,
    /// Unsigned 16-bit widened to 32 bits
    Uint16To32 = 0x12,
    /// Unsigned 16-bit widened to 64 bits
    Uint16To64 = 0x13,
    /// Unsigned 32-bit widened to 64 bits
    Uint32To64 = 0x23,

    // Cast up (value is signed, widened with the sign bit)
    /// Signed 8-bit sign-extended to 16 bits
    Sint8To16 = 0x81,
    /// Signed 8-bit sign-extended to 32 bits
    Sint8To32 = 0x82,
    /// Signed 8-bit sign-extended to 64 bits
    Sint8To64 = 0x83,
    /// Signed 16-bit sign-extended to 32 bits
    Sint16To32 = 0x92,
    /// Signed 16-bit sign-extended to 64 bits
    Sint16To64 = 0x93,
    /// Signed 32-bit sign-extended to 64 bits
    Sint32To64 = 0xA3,

    // Integer cast to float
    /// Unsigned 8-bit to float
    Uint8ToFloat = 0x43,
    /// Unsigned 16-bit to float
    Uint16ToFloat = 0x53,
    /// Unsigned 32-bit to float
    Uint32ToFloat = 0x63,
    /// Unsigned 64-bit to float
    Uint64ToFloat = 0x73,
    /// Signed 8-bit to float
    Sint8ToFloat = 0xC3,
    /// Signed 16-bit to float
    Sint16ToFloat = 0xD3,
    /// Signed 32-bit to float
    Sint32ToFloat = 0xE3,
    /// Signed 64-bit to float
    Sint64ToFloat = 0xF3,

    /// Unsigned 8-bit to double
    Uint8ToDouble = 0x4B,
    /// Unsigned 16-bit to double
    Uint16ToDouble = 0x5B,
    /// Unsigned 32-bit to double
    Uint32ToDouble = 0x6B,
    /// Unsigned 64-bit to double
    Uint64ToDouble = 0x7B,
    /// Signed 8-bit to double
    Sint8ToDouble = 0xCB,
    /// Signed 16-bit to double
    Sint16ToDouble = 0xDB,
    /// Signed 32-bit to double
    Sint32ToDouble = 0xEB,
    /// Signed 64-bit to double
    Sint64ToDouble = 0xFB,

    // Float cast to integer
    /// Float to unsigned 8-bit
    FloatToUint8 = 0x47,
    /// Float to unsigned 16-bit
    FloatToUint16 = 0x57,
    /// Float to unsigned 32-bit
    FloatToUint32 = 0x67,
    /// Float to unsigned 64-bit
    FloatToUint64 = 0x77,
    /// Float to signed 8-bit
    FloatToSint8 = 0xC7,
    /// Float to signed 16-bit
    FloatToSint16 = 0xD7,
    /// Float to signed 32-bit
    FloatToSint32 = 0xE7,
    /// Float to signed 64-bit
    FloatToSint64 = 0xF7,

    /// Double to unsigned 8-bit
    DoubleToUint8 = 0x4F,
    /// Double to unsigned 16-bit
    DoubleToUint16 = 0x5F,
    /// Double to unsigned 32-bit
    DoubleToUint32 = 0x6F,
    /// Double to unsigned 64-bit
    DoubleToUint64 = 0x7F,
    /// Double to signed 8-bit
    DoubleToSint8 = 0xCF,
    /// Double to signed 16-bit
    DoubleToSint16 = 0xDF,
    /// Double to signed 32-bit
    DoubleToSint32 = 0xEF,
    /// Double to signed 64-bit
    DoubleToSint64 = 0xFF,

    // Float cast
    /// Float widened to double
    FloatToDouble = 0x07,
    /// Double narrowed to float
    DoubleToFloat = 0x17,
}

impl BaseCastType {
    /// Representation of the value before the cast.
    pub fn source_type(self) -> BaseType {
        match self {
            Self::Int16To8 => BaseType::Int16,
            Self::Int32To8 | Self::Int32To16 => BaseType::Int32,
            Self::Int64To8 | Self::Int64To16 | Self::Int64To32 => BaseType::Int64,

            Self::Uint8To16 | Self::Uint8To32 | Self::Uint8To64 => BaseType::Uint8,
            Self::Uint16To32 | Self::Uint16To64 => BaseType::Uint16,
            Self::Uint32To64 => BaseType::Uint32,

            Self::Sint8To16 | Self::Sint8To32 | Self::Sint8To64 => BaseType::Int8,
            Self::Sint16To32 | Self::Sint16To64 => BaseType::Int16,
            Self::Sint32To64 => BaseType::Int32,

            Self::Uint8ToFloat | Self::Uint8ToDouble => BaseType::Uint8,
            Self::Uint16ToFloat | Self::Uint16ToDouble => BaseType::Uint16,
            Self::Uint32ToFloat | Self::Uint32ToDouble => BaseType::Uint32,
            Self::Uint64ToFloat | Self::Uint64ToDouble => BaseType::Uint64,
            Self::Sint8ToFloat | Self::Sint8ToDouble => BaseType::Int8,
            Self::Sint16ToFloat | Self::Sint16ToDouble => BaseType::Int16,
            Self::Sint32ToFloat | Self::Sint32ToDouble => BaseType::Int32,
            Self::Sint64ToFloat | Self::Sint64ToDouble => BaseType::Int64,

            Self::FloatToUint8
            | Self::FloatToUint16
            | Self::FloatToUint32
            | Self::FloatToUint64
            | Self::FloatToSint8
            | Self::FloatToSint16
            | Self::FloatToSint32
            | Self::FloatToSint64
            | Self::FloatToDouble => BaseType::Float,

            Self::DoubleToUint8
            | Self::DoubleToUint16
            | Self::DoubleToUint32
            | Self::DoubleToUint64
            | Self::DoubleToSint8
            | Self::DoubleToSint16
            | Self::DoubleToSint32
            | Self::DoubleToSint64
            | Self::DoubleToFloat => BaseType::Double,
        }
    }

    /// Representation of the value after the cast.
    pub fn target_type(self) -> BaseType {
        match self {
            Self::Int16To8 | Self::Int32To8 | Self::Int64To8 => BaseType::Int8,
            Self::Int32To16 | Self::Int64To16 => BaseType::Int16,
            Self::Int64To32 => BaseType::Int32,

            Self::Uint8To16 => BaseType::Uint16,
            Self::Uint8To32 | Self::Uint16To32 => BaseType::Uint32,
            Self::Uint8To64 | Self::Uint16To64 | Self::Uint32To64 => BaseType::Uint64,

            Self::Sint8To16 => BaseType::Int16,
            Self::Sint8To32 | Self::Sint16To32 => BaseType::Int32,
            Self::Sint8To64 | Self::Sint16To64 | Self::Sint32To64 => BaseType::Int64,

            Self::Uint8ToFloat
            | Self::Uint16ToFloat
            | Self::Uint32ToFloat
            | Self::Uint64ToFloat
            | Self::Sint8ToFloat
            | Self::Sint16ToFloat
            | Self::Sint32ToFloat
            | Self::Sint64ToFloat
            | Self::DoubleToFloat => BaseType::Float,

            Self::Uint8ToDouble
            | Self::Uint16ToDouble
            | Self::Uint32ToDouble
            | Self::Uint64ToDouble
            | Self::Sint8ToDouble
            | Self::Sint16ToDouble
            | Self::Sint32ToDouble
            | Self::Sint64ToDouble
            | Self::FloatToDouble => BaseType::Double,

            Self::FloatToUint8 | Self::DoubleToUint8 => BaseType::Uint8,
            Self::FloatToUint16 | Self::DoubleToUint16 => BaseType::Uint16,
            Self::FloatToUint32 | Self::DoubleToUint32 => BaseType::Uint32,
            Self::FloatToUint64 | Self::DoubleToUint64 => BaseType::Uint64,
            Self::FloatToSint8 | Self::DoubleToSint8 => BaseType::Int8,
            Self::FloatToSint16 | Self::DoubleToSint16 => BaseType::Int16,
            Self::FloatToSint32 | Self::DoubleToSint32 => BaseType::Int32,
            Self::FloatToSint64 | Self::DoubleToSint64 => BaseType::Int64,
        }
    }
}

/// How a requested `(source, target)` conversion is realized in opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastHandling {
    /// The representations agree; no opcode is emitted.
    NoCast,
    /// Emit a `CAST_VALUE` opcode with the given cast kind.
    BaseCast(BaseCastType),
    /// Cast to `any`: tag the value with its source type id.
    AnyCast,
}

/// Look up how to convert `source` into `target`.
///
/// Returns `None` when no supported conversion exists; the emitter reports
/// that as an invalid cast.
pub fn get_cast_handling(source: DataType, target: DataType) -> Option<CastHandling> {
    if source == target {
        return Some(CastHandling::NoCast);
    }
    if target == DataType::Any {
        return Some(CastHandling::AnyCast);
    }
    match (source, target) {
        (DataType::Base(from), DataType::Base(to)) => get_base_cast_handling(from, to),
        // Strings travel as u64 handles; only the handle-sized reinterpretation is allowed.
        (DataType::String, DataType::Base(BaseType::Uint64))
        | (DataType::Base(BaseType::Uint64), DataType::String) => Some(CastHandling::NoCast),
        _ => None,
    }
}

fn get_base_cast_handling(source: BaseType, target: BaseType) -> Option<CastHandling> {
    if source == BaseType::Void || target == BaseType::Void {
        return None;
    }

    // Bool behaves as an unsigned byte, untyped constants as signed 64-bit.
    let from = normalize(source);
    let to = normalize(target);
    if from == to {
        return Some(CastHandling::NoCast);
    }

    let handling = match (from.is_integer(), to.is_integer()) {
        (true, true) => {
            let from_bytes = from.size_of();
            let to_bytes = to.size_of();
            if from_bytes == to_bytes {
                // Reinterpretation between same-width signednesses is free.
                CastHandling::NoCast
            } else if to_bytes < from_bytes {
                CastHandling::BaseCast(integer_down_cast(from_bytes, to_bytes))
            } else {
                CastHandling::BaseCast(integer_up_cast(from, to_bytes))
            }
        }
        (true, false) => CastHandling::BaseCast(integer_to_float_cast(from, to)),
        (false, true) => CastHandling::BaseCast(float_to_integer_cast(from, to)),
        (false, false) => match (from, to) {
            (BaseType::Float, BaseType::Double) => CastHandling::BaseCast(BaseCastType::FloatToDouble),
            (BaseType::Double, BaseType::Float) => CastHandling::BaseCast(BaseCastType::DoubleToFloat),
            _ => return None,
        },
    };
    Some(handling)
}

fn normalize(base_type: BaseType) -> BaseType {
    match base_type {
        BaseType::Bool => BaseType::Uint8,
        BaseType::IntConst => BaseType::Int64,
        other => other,
    }
}

fn integer_down_cast(from_bytes: usize, to_bytes: usize) -> BaseCastType {
    match (from_bytes, to_bytes) {
        (2, 1) => BaseCastType::Int16To8,
        (4, 1) => BaseCastType::Int32To8,
        (8, 1) => BaseCastType::Int64To8,
        (4, 2) => BaseCastType::Int32To16,
        (8, 2) => BaseCastType::Int64To16,
        (8, 4) => BaseCastType::Int64To32,
        _ => unreachable!("not a narrowing integer cast"),
    }
}

fn integer_up_cast(from: BaseType, to_bytes: usize) -> BaseCastType {
    if from.is_signed_integer() {
        match (from.size_of(), to_bytes) {
            (1, 2) => BaseCastType::Sint8To16,
            (1, 4) => BaseCastType::Sint8To32,
            (1, 8) => BaseCastType::Sint8To64,
            (2, 4) => BaseCastType::Sint16To32,
            (2, 8) => BaseCastType::Sint16To64,
            (4, 8) => BaseCastType::Sint32To64,
            _ => unreachable!("not a widening integer cast"),
        }
    } else {
        match (from.size_of(), to_bytes) {
            (1, 2) => BaseCastType::Uint8To16,
            (1, 4) => BaseCastType::Uint8To32,
            (1, 8) => BaseCastType::Uint8To64,
            (2, 4) => BaseCastType::Uint16To32,
            (2, 8) => BaseCastType::Uint16To64,
            (4, 8) => BaseCastType::Uint32To64,
            _ => unreachable!("not a widening integer cast"),
        }
    }
}

fn integer_to_float_cast(from: BaseType, to: BaseType) -> BaseCastType {
    let to_double = to == BaseType::Double;
    if from.is_signed_integer() {
        match (from.size_of(), to_double) {
            (1, false) => BaseCastType::Sint8ToFloat,
            (2, false) => BaseCastType::Sint16ToFloat,
            (4, false) => BaseCastType::Sint32ToFloat,
            (8, false) => BaseCastType::Sint64ToFloat,
            (1, true) => BaseCastType::Sint8ToDouble,
            (2, true) => BaseCastType::Sint16ToDouble,
            (4, true) => BaseCastType::Sint32ToDouble,
            (8, true) => BaseCastType::Sint64ToDouble,
            _ => unreachable!("invalid integer width"),
        }
    } else {
        match (from.size_of(), to_double) {
            (1, false) => BaseCastType::Uint8ToFloat,
            (2, false) => BaseCastType::Uint16ToFloat,
            (4, false) => BaseCastType::Uint32ToFloat,
            (8, false) => BaseCastType::Uint64ToFloat,
            (1, true) => BaseCastType::Uint8ToDouble,
            (2, true) => BaseCastType::Uint16ToDouble,
            (4, true) => BaseCastType::Uint32ToDouble,
            (8, true) => BaseCastType::Uint64ToDouble,
            _ => unreachable!("invalid integer width"),
        }
    }
}

fn float_to_integer_cast(from: BaseType, to: BaseType) -> BaseCastType {
    let from_double = from == BaseType::Double;
    if to.is_signed_integer() {
        match (to.size_of(), from_double) {
            (1, false) => BaseCastType::FloatToSint8,
            (2, false) => BaseCastType::FloatToSint16,
            (4, false) => BaseCastType::FloatToSint32,
            (8, false) => BaseCastType::FloatToSint64,
            (1, true) => BaseCastType::DoubleToSint8,
            (2, true) => BaseCastType::DoubleToSint16,
            (4, true) => BaseCastType::DoubleToSint32,
            (8, true) => BaseCastType::DoubleToSint64,
            _ => unreachable!("invalid integer width"),
        }
    } else {
        match (to.size_of(), from_double) {
            (1, false) => BaseCastType::FloatToUint8,
            (2, false) => BaseCastType::FloatToUint16,
            (4, false) => BaseCastType::FloatToUint32,
            (8, false) => BaseCastType::FloatToUint64,
            (1, true) => BaseCastType::DoubleToUint8,
            (2, true) => BaseCastType::DoubleToUint16,
            (4, true) => BaseCastType::DoubleToUint32,
            (8, true) => BaseCastType::DoubleToUint64,
            _ => unreachable!("invalid integer width"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_no_cast() {
        let u8_type = DataType::Base(BaseType::Uint8);
        assert_eq!(get_cast_handling(u8_type, u8_type), Some(CastHandling::NoCast));
    }

    #[test]
    fn test_same_width_reinterpretation() {
        let handling = get_cast_handling(
            DataType::Base(BaseType::Uint32),
            DataType::Base(BaseType::Int32),
        );
        assert_eq!(handling, Some(CastHandling::NoCast));
    }

    #[test]
    fn test_widening_tracks_source_signedness() {
        assert_eq!(
            get_cast_handling(DataType::Base(BaseType::Uint8), DataType::Base(BaseType::Uint32)),
            Some(CastHandling::BaseCast(BaseCastType::Uint8To32))
        );
        assert_eq!(
            get_cast_handling(DataType::Base(BaseType::Int8), DataType::Base(BaseType::Uint32)),
            Some(CastHandling::BaseCast(BaseCastType::Sint8To32))
        );
    }

    #[test]
    fn test_narrowing_ignores_signedness() {
        assert_eq!(
            get_cast_handling(DataType::Base(BaseType::Int64), DataType::Base(BaseType::Uint8)),
            Some(CastHandling::BaseCast(BaseCastType::Int64To8))
        );
        assert_eq!(
            get_cast_handling(DataType::Base(BaseType::Uint64), DataType::Base(BaseType::Int8)),
            Some(CastHandling::BaseCast(BaseCastType::Int64To8))
        );
    }

    #[test]
    fn test_int_const_behaves_as_signed_64() {
        assert_eq!(
            get_cast_handling(DataType::Base(BaseType::IntConst), DataType::Base(BaseType::Uint8)),
            Some(CastHandling::BaseCast(BaseCastType::Int64To8))
        );
        assert_eq!(
            get_cast_handling(DataType::Base(BaseType::IntConst), DataType::Base(BaseType::Float)),
            Some(CastHandling::BaseCast(BaseCastType::Sint64ToFloat))
        );
    }

    #[test]
    fn test_float_conversions() {
        assert_eq!(
            get_cast_handling(DataType::Base(BaseType::Float), DataType::Base(BaseType::Double)),
            Some(CastHandling::BaseCast(BaseCastType::FloatToDouble))
        );
        assert_eq!(
            get_cast_handling(DataType::Base(BaseType::Double), DataType::Base(BaseType::Int16)),
            Some(CastHandling::BaseCast(BaseCastType::DoubleToSint16))
        );
        assert_eq!(
            get_cast_handling(DataType::Base(BaseType::Uint16), DataType::Base(BaseType::Double)),
            Some(CastHandling::BaseCast(BaseCastType::Uint16ToDouble))
        );
    }

    #[test]
    fn test_any_cast() {
        assert_eq!(
            get_cast_handling(DataType::Base(BaseType::Uint32), DataType::Any),
            Some(CastHandling::AnyCast)
        );
    }

    #[test]
    fn test_unsupported_pairs_are_rejected() {
        assert_eq!(get_cast_handling(DataType::Void, DataType::Base(BaseType::Uint8)), None);
        assert_eq!(get_cast_handling(DataType::String, DataType::Base(BaseType::Float)), None);
        assert_eq!(
            get_cast_handling(DataType::Array { id: 0 }, DataType::Base(BaseType::Uint8)),
            None
        );
    }

    #[test]
    fn test_source_and_target_queries_are_consistent() {
        // Spot-check that every cast produced by the lookup reports matching
        // source/target representations.
        let pairs = [
            (BaseType::Uint8, BaseType::Uint64),
            (BaseType::Int16, BaseType::Int64),
            (BaseType::Int64, BaseType::Uint16),
            (BaseType::Uint32, BaseType::Float),
            (BaseType::Float, BaseType::Int8),
            (BaseType::Double, BaseType::Uint64),
        ];
        for (source, target) in pairs {
            let handling =
                get_cast_handling(DataType::Base(source), DataType::Base(target)).unwrap();
            if let CastHandling::BaseCast(cast) = handling {
                assert_eq!(cast.source_type().make_unsigned().size_of(), source.size_of());
                assert_eq!(cast.target_type().make_unsigned().size_of(), target.size_of());
            } else {
                panic!("expected a base cast for {:?} -> {:?}", source, target);
            }
        }
    }

    #[test]
    fn test_fold_mask_is_inert_for_float_casts() {
        // The peephole constant fold looks at bits 0-1 and 7 only. For every
        // float-involved cast those bits must select the do-nothing case.
        let float_casts = [
            BaseCastType::Uint8ToFloat,
            BaseCastType::Uint64ToFloat,
            BaseCastType::Sint32ToFloat,
            BaseCastType::Uint16ToDouble,
            BaseCastType::Sint64ToDouble,
            BaseCastType::FloatToUint8,
            BaseCastType::FloatToSint64,
            BaseCastType::DoubleToUint32,
            BaseCastType::DoubleToSint8,
            BaseCastType::FloatToDouble,
            BaseCastType::DoubleToFloat,
        ];
        for cast in float_casts {
            assert_eq!((cast as u8) & 0x03, 0x03, "{:?}", cast);
        }
    }
}
