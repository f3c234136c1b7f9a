use crate::errors::ClassFormatError;

/// Parsed form of a single field or parameter type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeDescriptor {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    /// `L<classname>;` with the binary class name.
    Object(String),
    /// `[<type>` with the component type.
    Array(Box<TypeDescriptor>),
}

/// Parses a method descriptor, `( ParameterDescriptor* ) ReturnDescriptor`,
/// down to what the VM keeps at class-load time: the argument count and the
/// return type. `None` is the void sentinel.
pub fn parse_method_descriptor(
    descriptor: &str,
) -> Result<(u16, Option<TypeDescriptor>), ClassFormatError> {
    let bytes = descriptor.as_bytes();
    let bad = || ClassFormatError::InvalidDescriptor(descriptor.to_string());
    if bytes.first() != Some(&b'(') {
        return Err(bad());
    }
    let mut pos = 1;
    let mut args_count: u16 = 0;
    while bytes.get(pos) != Some(&b')') {
        parse_type(bytes, &mut pos).ok_or_else(bad)?;
        args_count += 1;
    }
    pos += 1;
    let return_type = if bytes.get(pos) == Some(&b'V') {
        pos += 1;
        None
    } else {
        Some(parse_type(bytes, &mut pos).ok_or_else(bad)?)
    };
    if pos != bytes.len() {
        return Err(bad());
    }
    Ok((args_count, return_type))
}

fn parse_type(bytes: &[u8], pos: &mut usize) -> Option<TypeDescriptor> {
    let ch = *bytes.get(*pos)?;
    *pos += 1;
    Some(match ch {
        b'B' => TypeDescriptor::Byte,
        b'C' => TypeDescriptor::Char,
        b'D' => TypeDescriptor::Double,
        b'F' => TypeDescriptor::Float,
        b'I' => TypeDescriptor::Int,
        b'J' => TypeDescriptor::Long,
        b'S' => TypeDescriptor::Short,
        b'Z' => TypeDescriptor::Boolean,
        b'L' => {
            let start = *pos;
            while *bytes.get(*pos)? != b';' {
                *pos += 1;
            }
            let name = std::str::from_utf8(&bytes[start..*pos]).ok()?;
            *pos += 1;
            if name.is_empty() {
                return None;
            }
            TypeDescriptor::Object(name.to_string())
        }
        b'[' => TypeDescriptor::Array(Box::new(parse_type(bytes, pos)?)),
        _ => return None,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nullary_void() {
        assert_eq!(parse_method_descriptor("()V").unwrap(), (0, None));
    }

    #[test]
    fn mixed_arguments() {
        let (args, ret) = parse_method_descriptor("(IJLjava/lang/String;[I)I").unwrap();
        assert_eq!(args, 4);
        assert_eq!(ret, Some(TypeDescriptor::Int));
    }

    #[test]
    fn nested_array_argument() {
        let (args, ret) = parse_method_descriptor("([[Ljava/lang/Object;)V").unwrap();
        assert_eq!(args, 1);
        assert_eq!(ret, None);
    }

    #[test]
    fn object_return() {
        let (args, ret) = parse_method_descriptor("()Ljava/lang/Object;").unwrap();
        assert_eq!(args, 0);
        assert_eq!(ret, Some(TypeDescriptor::Object("java/lang/Object".into())));
    }

    #[test]
    fn rejects_malformed() {
        assert!(parse_method_descriptor("(I").is_err());
        assert!(parse_method_descriptor("(X)V").is_err());
        assert!(parse_method_descriptor("()").is_err());
        assert!(parse_method_descriptor("()VV").is_err());
        assert!(parse_method_descriptor("I").is_err());
        assert!(parse_method_descriptor("(L;)V").is_err());
    }
}
