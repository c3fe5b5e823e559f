use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::{ClassLinker, ClassRef, InvokeError, InvokeResult, Primitive};

/// Return class plus ordered parameter classes. Immutable once built.
#[derive(Clone)]
pub struct MethodType {
    rtype: ClassRef,
    ptypes: Box<[ClassRef]>,
}

impl MethodType {
    #[must_use]
    pub fn new(rtype: ClassRef, ptypes: impl Into<Box<[ClassRef]>>) -> Self {
        Self {
            rtype,
            ptypes: ptypes.into(),
        }
    }

    #[inline]
    #[must_use]
    pub fn rtype(&self) -> &ClassRef {
        &self.rtype
    }

    #[inline]
    #[must_use]
    pub fn ptypes(&self) -> &[ClassRef] {
        &self.ptypes
    }

    #[inline]
    #[must_use]
    pub fn ptype(&self, index: usize) -> &ClassRef {
        &self.ptypes[index]
    }

    #[inline]
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.ptypes.len()
    }

    /// Operand slots the parameters occupy; long and double take two.
    #[must_use]
    pub fn number_of_vregs(&self) -> usize {
        self.ptypes
            .iter()
            .map(|ptype| ptype.primitive().slot_count())
            .sum()
    }

    /// Element-wise class identity. Two independently built types with the
    /// same classes match.
    #[must_use]
    pub fn is_exact_match(&self, other: &MethodType) -> bool {
        Arc::ptr_eq(&self.rtype, &other.rtype)
            && self.ptypes.len() == other.ptypes.len()
            && self
                .ptypes
                .iter()
                .zip(other.ptypes.iter())
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }

    #[must_use]
    pub fn clone_without_leading_parameter(&self) -> MethodType {
        Self {
            rtype: self.rtype.clone(),
            ptypes: self.ptypes.iter().skip(1).cloned().collect(),
        }
    }

    /// `(ILjava/lang/Object;)V` style descriptor.
    #[must_use]
    pub fn descriptor(&self) -> String {
        let mut out = String::from("(");
        for ptype in self.ptypes.iter() {
            out.push_str(ptype.descriptor());
        }
        out.push(')');
        out.push_str(self.rtype.descriptor());
        out
    }
}

impl std::fmt::Display for MethodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("(")?;
        for (i, ptype) in self.ptypes.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(&ptype.pretty_name())?;
        }
        write!(f, "){}", self.rtype.pretty_name())
    }
}

impl std::fmt::Debug for MethodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MethodType{}", self.descriptor())
    }
}

pub struct MethodTypesImpl {
    types: FxHashMap<String, Arc<MethodType>>,
}

/// Interning table keyed by descriptor, shared between threads.
#[derive(Clone)]
pub struct MethodTypeTable(Arc<RwLock<MethodTypesImpl>>);

impl MethodTypesImpl {
    fn new() -> Self {
        Self {
            types: FxHashMap::default(),
        }
    }

    fn get_or_add(&mut self, method_type: MethodType) -> Arc<MethodType> {
        self.types
            .entry(method_type.descriptor())
            .or_insert_with(|| Arc::new(method_type))
            .clone()
    }
}

impl MethodTypeTable {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(MethodTypesImpl::new())))
    }

    pub fn intern(&self, method_type: MethodType) -> Arc<MethodType> {
        if let Some(found) = self.0.read().types.get(&method_type.descriptor()) {
            return found.clone();
        }
        self.0.write().get_or_add(method_type)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.read().types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parses a method descriptor and resolves each class through `linker`.
    pub fn from_descriptor(
        &self,
        linker: &dyn ClassLinker,
        descriptor: &str,
    ) -> InvokeResult<Arc<MethodType>> {
        if let Some(found) = self.0.read().types.get(descriptor) {
            return Ok(found.clone());
        }

        let malformed = || InvokeError::ClassNotFound(descriptor.to_string());
        let params = descriptor
            .strip_prefix('(')
            .and_then(|rest| rest.split_once(')'));
        let Some((mut params, rtype)) = params else {
            return Err(malformed());
        };

        let mut ptypes = Vec::new();
        while !params.is_empty() {
            let len = type_descriptor_len(params).ok_or_else(malformed)?;
            ptypes.push(linker.find_class(&params[..len])?);
            params = &params[len..];
        }
        if type_descriptor_len(rtype) != Some(rtype.len()) {
            return Err(malformed());
        }
        let rtype = linker.find_class(rtype)?;

        Ok(self.intern(MethodType::new(rtype, ptypes)))
    }
}

impl Default for MethodTypeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the first type descriptor in `s`.
fn type_descriptor_len(s: &str) -> Option<usize> {
    let dims = s.bytes().take_while(|&b| b == b'[').count();
    let rest = &s[dims..];
    match rest.as_bytes().first()? {
        b'L' => rest.find(';').map(|end| dims + end + 1),
        &c => match Primitive::from_descriptor(c)? {
            Primitive::Void if dims > 0 => None,
            _ => Some(dims + 1),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestWorld;

    #[test]
    fn descriptor_lengths() {
        assert_eq!(type_descriptor_len("I"), Some(1));
        assert_eq!(type_descriptor_len("Ljava/lang/String;J"), Some(18));
        assert_eq!(type_descriptor_len("[[JI"), Some(3));
        assert_eq!(type_descriptor_len("[V"), None);
        assert_eq!(type_descriptor_len("Lunterminated"), None);
    }

    #[test]
    fn exact_match_is_structural_identity() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let a = rt.method_type_from_descriptor("(IJ)V").expect("resolves");
        let b = MethodType::new(
            rt.primitive_class(Primitive::Void),
            vec![
                rt.primitive_class(Primitive::Int),
                rt.primitive_class(Primitive::Long),
            ],
        );
        let c = rt.method_type_from_descriptor("(IJ)Z").expect("resolves");

        assert!(a.is_exact_match(&a), "reflexive");
        assert!(a.is_exact_match(&b) && b.is_exact_match(&a), "symmetric");
        assert!(!a.is_exact_match(&c), "return type differs");
        assert_eq!(a.number_of_vregs(), 3);
        assert_eq!(a.parameter_count(), 2);
    }

    #[test]
    fn interning_shares_instances() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let a = rt
            .method_type_from_descriptor("(Ljava/lang/Object;[I)D")
            .expect("resolves");
        let b = rt
            .method_type_from_descriptor("(Ljava/lang/Object;[I)D")
            .expect("resolves");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.descriptor(), "(Ljava/lang/Object;[I)D");
        assert_eq!(a.to_string(), "(java.lang.Object,int[])double");
    }

    #[test]
    fn leading_parameter_is_dropped() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        let full = rt
            .method_type_from_descriptor("(Ljava/lang/Object;IF)V")
            .expect("resolves");
        assert_eq!(full.clone_without_leading_parameter().descriptor(), "(IF)V");
    }

    #[test]
    fn malformed_descriptors_are_rejected() {
        let world = TestWorld::new();
        let rt = &world.runtime;
        for bad in ["IV", "(I", "(Q)V", "(I)VV", "(Lmissing/Class;)V"] {
            assert!(
                rt.method_type_from_descriptor(bad).is_err(),
                "{bad} should not resolve"
            );
        }
    }
}
