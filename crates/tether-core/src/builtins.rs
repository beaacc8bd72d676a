//! The built-in `__object` module: generic property access on host objects.
//!
//! | path                | signature                                   |
//! |---------------------|---------------------------------------------|
//! | `hasProperty`       | `bool (object, name)`                       |
//! | `getTypeOfProperty` | `u8 (object, name)`, see [`PropertyType`]   |
//! | `getKeys`           | `string[] (object)`                         |
//! | `getProperty`       | `<any> (object, name)`                      |
//! | `setProperty`       | `void (object, name, <any>)`                |
//! | `deleteProperty`    | `bool (object, name)`                       |
//! | `create`            | `object ()`                                 |

use crate::host::{HostError, ImportTable};
use crate::object::{ObjectRef, PlainObject};
use crate::value::HostValue;

/// Module name the built-ins are published under.
pub const OBJECT_MODULE: &str = "__object";

/// Type codes returned by `getTypeOfProperty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PropertyType {
    Undefined = 0,
    String = 1,
    Number = 2,
    BigInt = 3,
    Boolean = 4,
    Object = 5,
    Function = 6,
    Symbol = 7,
}

impl PropertyType {
    pub fn of(value: &HostValue) -> Self {
        match value {
            HostValue::Undefined => Self::Undefined,
            HostValue::String(_) => Self::String,
            HostValue::Number(_) => Self::Number,
            HostValue::BigInt(_) => Self::BigInt,
            HostValue::Bool(_) => Self::Boolean,
            HostValue::Null
            | HostValue::Object(_)
            | HostValue::Array(_)
            | HostValue::Pointer { .. } => Self::Object,
        }
    }
}

fn object_arg(args: &[HostValue], i: usize) -> Result<&ObjectRef, HostError> {
    match args.get(i) {
        Some(HostValue::Object(obj)) => Ok(obj),
        other => Err(HostError::thrown(format!(
            "argument {i} must be an object, got {}",
            other.map_or("nothing", HostValue::type_name)
        ))),
    }
}

fn name_arg(args: &[HostValue], i: usize) -> Result<String, HostError> {
    match args.get(i) {
        Some(value) if !value.is_nullish() => Ok(value.to_display_string()),
        _ => Err(HostError::thrown(format!("argument {i} must be a property name"))),
    }
}

/// Build the `__object` capability table.
pub fn object_module() -> ImportTable {
    ImportTable::new()
        .function("hasProperty", |_, args| {
            let obj = object_arg(args, 0)?;
            Ok(obj.has_property(&name_arg(args, 1)?).into())
        })
        .function("getTypeOfProperty", |_, args| {
            let obj = object_arg(args, 0)?;
            let value = obj
                .get_property(&name_arg(args, 1)?)
                .unwrap_or(HostValue::Undefined);
            Ok(HostValue::Number(PropertyType::of(&value) as u8 as f64))
        })
        .function("getKeys", |_, args| {
            let keys = object_arg(args, 0)?.keys();
            Ok(HostValue::Array(keys.into_iter().map(HostValue::String).collect()))
        })
        .function("getProperty", |_, args| {
            let obj = object_arg(args, 0)?;
            Ok(obj
                .get_property(&name_arg(args, 1)?)
                .unwrap_or(HostValue::Undefined))
        })
        .function("setProperty", |_, args| {
            let obj = object_arg(args, 0)?;
            let value = args.get(2).cloned().unwrap_or(HostValue::Undefined);
            obj.set_property(&name_arg(args, 1)?, value)?;
            Ok(HostValue::Undefined)
        })
        .function("deleteProperty", |_, args| {
            let obj = object_arg(args, 0)?;
            Ok(obj.delete_property(&name_arg(args, 1)?).into())
        })
        .function("create", |_, _| {
            Ok(PlainObject::new("Object").into_ref().into())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes() {
        assert_eq!(PropertyType::of(&HostValue::Undefined) as u8, 0);
        assert_eq!(PropertyType::of(&HostValue::from("s")) as u8, 1);
        assert_eq!(PropertyType::of(&HostValue::Number(1.0)) as u8, 2);
        assert_eq!(PropertyType::of(&HostValue::BigInt(1)) as u8, 3);
        assert_eq!(PropertyType::of(&HostValue::Bool(false)) as u8, 4);
        assert_eq!(PropertyType::of(&HostValue::Null) as u8, 5);
    }

    #[test]
    fn test_module_paths() {
        let module = object_module();
        for path in [
            "hasProperty",
            "getTypeOfProperty",
            "getKeys",
            "getProperty",
            "setProperty",
            "deleteProperty",
            "create",
        ] {
            assert!(module.resolve(path).is_some(), "{path}");
        }
    }
}
