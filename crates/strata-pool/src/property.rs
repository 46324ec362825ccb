//! Pool property names, numbers and value encodings.

use strata_engine::rpc::{PoolProperty, PropValue};

use crate::error::{PoolError, PoolResult};
use crate::types::PropertyArg;

pub const PROP_LABEL: u32 = 1;
pub const PROP_SPACE_RB: u32 = 3;
pub const PROP_SELF_HEAL: u32 = 4;
pub const PROP_RECLAIM: u32 = 5;

pub const SELF_HEAL_AUTO_EXCLUDE: u64 = 1 << 0;
pub const SELF_HEAL_AUTO_REBUILD: u64 = 1 << 1;

pub const RECLAIM_DISABLED: u64 = 0;
pub const RECLAIM_LAZY: u64 = 1;
pub const RECLAIM_TIME: u64 = 2;

const SPACE_RB_MAX: u64 = 100;

const RECLAIM_NAMES: &[(&str, u64)] = &[
    ("disabled", RECLAIM_DISABLED),
    ("lazy", RECLAIM_LAZY),
    ("time", RECLAIM_TIME),
];

const SELF_HEAL_NAMES: &[(&str, u64)] = &[
    ("exclude", SELF_HEAL_AUTO_EXCLUDE),
    ("rebuild", SELF_HEAL_AUTO_REBUILD),
    ("exclude,rebuild", SELF_HEAL_AUTO_EXCLUDE | SELF_HEAL_AUTO_REBUILD),
];

/// Property number for a name.
pub fn number_for(name: &str) -> PoolResult<u32> {
    match name {
        "label" => Ok(PROP_LABEL),
        "space_rb" => Ok(PROP_SPACE_RB),
        "self_heal" => Ok(PROP_SELF_HEAL),
        "reclaim" => Ok(PROP_RECLAIM),
        _ => Err(PoolError::property("unhandled pool property")),
    }
}

fn encode(table: &[(&str, u64)], value: &PropValue, err: &str) -> PoolResult<PropValue> {
    let PropValue::Text(text) = value else {
        return Err(PoolError::property(err));
    };
    let text = text.trim().to_ascii_lowercase();
    let canonical = match text.as_str() {
        "rebuild,exclude" => "exclude,rebuild",
        other => other,
    };
    table
        .iter()
        .find(|(n, _)| *n == canonical)
        .map(|(_, v)| PropValue::Number(*v))
        .ok_or_else(|| PoolError::property(err))
}

fn decode(table: &[(&str, u64)], value: &PropValue, err: &str) -> PoolResult<PropValue> {
    let PropValue::Number(n) = value else {
        return Err(PoolError::property(err));
    };
    table
        .iter()
        .find(|(_, v)| v == n)
        .map(|(name, _)| PropValue::Text(name.to_string()))
        .ok_or_else(|| PoolError::property(err))
}

/// Translate a named property into its wire form.
pub fn to_engine(arg: &PropertyArg) -> PoolResult<PoolProperty> {
    let number = number_for(&arg.name)?;
    let value = match number {
        PROP_LABEL => PropValue::Text(arg.value.to_string()),
        PROP_SPACE_RB => match arg.value {
            PropValue::Number(n) if n <= SPACE_RB_MAX => PropValue::Number(n),
            _ => return Err(PoolError::property("invalid space_rb value")),
        },
        PROP_SELF_HEAL => encode(SELF_HEAL_NAMES, &arg.value, "unhandled self_heal type")?,
        PROP_RECLAIM => encode(RECLAIM_NAMES, &arg.value, "unhandled reclaim type")?,
        _ => return Err(PoolError::property("unhandled pool property")),
    };
    Ok(PoolProperty { number, value })
}

/// Translate a wire property back into its named form.
pub fn from_engine(prop: &PoolProperty) -> PoolResult<PropertyArg> {
    let (name, value) = match prop.number {
        PROP_LABEL => ("label", PropValue::Text(prop.value.to_string())),
        PROP_SPACE_RB => ("space_rb", prop.value.clone()),
        PROP_SELF_HEAL => (
            "self_heal",
            decode(SELF_HEAL_NAMES, &prop.value, "unhandled self_heal type")?,
        ),
        PROP_RECLAIM => (
            "reclaim",
            decode(RECLAIM_NAMES, &prop.value, "unhandled reclaim type")?,
        ),
        _ => return Err(PoolError::property("unhandled pool property")),
    };
    Ok(PropertyArg {
        name: name.to_string(),
        value,
    })
}

/// Check that the engine applied exactly what was sent.
pub fn verify_echo(sent: &[PoolProperty], echoed: &[PoolProperty]) -> PoolResult<()> {
    if sent.len() != echoed.len() {
        return Err(PoolError::property("Response number doesn't match"));
    }
    for (want, got) in sent.iter().zip(echoed) {
        if want.number != got.number {
            return Err(PoolError::property("Response number doesn't match"));
        }
        if want.value != got.value {
            return Err(PoolError::property("Response value doesn't match"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err_of(arg: PropertyArg) -> String {
        to_engine(&arg).unwrap_err().to_string()
    }

    #[test]
    fn reclaim_values() {
        for (name, n) in [("disabled", 0), ("lazy", 1), ("time", 2)] {
            let prop = to_engine(&PropertyArg::text("reclaim", name)).unwrap();
            assert_eq!(prop.number, PROP_RECLAIM);
            assert_eq!(prop.value, PropValue::Number(n));
            assert_eq!(from_engine(&prop).unwrap(), PropertyArg::text("reclaim", name));
        }
        assert_eq!(
            err_of(PropertyArg::text("reclaim", "unknown")),
            "unhandled reclaim type"
        );
    }

    #[test]
    fn self_heal_values() {
        let both = to_engine(&PropertyArg::text("self_heal", "rebuild,exclude")).unwrap();
        assert_eq!(both.value, PropValue::Number(3));
        assert_eq!(
            from_engine(&both).unwrap(),
            PropertyArg::text("self_heal", "exclude,rebuild")
        );
        assert_eq!(
            err_of(PropertyArg::text("self_heal", "unknown")),
            "unhandled self_heal type"
        );
    }

    #[test]
    fn space_rb_is_numeric_and_bounded() {
        let prop = to_engine(&PropertyArg::number("space_rb", 42)).unwrap();
        assert_eq!(prop.value, PropValue::Number(42));
        assert_eq!(
            err_of(PropertyArg::number("space_rb", 101)),
            "invalid space_rb value"
        );
        assert_eq!(
            err_of(PropertyArg::text("space_rb", "5%")),
            "invalid space_rb value"
        );
    }

    #[test]
    fn unknown_property() {
        assert_eq!(
            err_of(PropertyArg::text("unknown", "x")),
            "unhandled pool property"
        );
        let err = from_engine(&PoolProperty {
            number: 99,
            value: PropValue::Number(1),
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "unhandled pool property");
    }

    #[test]
    fn empty_label_is_valid() {
        let prop = to_engine(&PropertyArg::text("label", "")).unwrap();
        assert_eq!(prop.value, PropValue::Text(String::new()));
    }

    #[test]
    fn echo_mismatches() {
        let sent = vec![to_engine(&PropertyArg::text("reclaim", "disabled")).unwrap()];
        let wrong_number = vec![PoolProperty {
            number: PROP_SPACE_RB,
            value: PropValue::Number(0),
        }];
        let wrong_value = vec![PoolProperty {
            number: PROP_RECLAIM,
            value: PropValue::Number(RECLAIM_TIME),
        }];
        assert_eq!(
            verify_echo(&sent, &wrong_number).unwrap_err().to_string(),
            "Response number doesn't match"
        );
        assert_eq!(
            verify_echo(&sent, &wrong_value).unwrap_err().to_string(),
            "Response value doesn't match"
        );
        verify_echo(&sent, &sent).unwrap();
    }
}
