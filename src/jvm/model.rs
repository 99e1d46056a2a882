use super::code::CodeAttribute;
use super::{ClassAccessFlags, ConstantPool, FieldAccessFlags, MethodAccessFlags};
use std::collections::BTreeMap;
use std::fmt;

/// Class file version
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const JAVA1_6: Version = Version {
        major: 50,
        minor: 0,
    };
    pub const JAVA8: Version = Version {
        major: 52,
        minor: 0,
    };
    pub const JAVA11: Version = Version {
        major: 55,
        minor: 0,
    };
}

/// Class whose code may be rewritten
#[derive(Clone, Debug)]
pub struct ProgramClass {
    /// Binary name, eg. `com/example/Foo`
    pub name: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub access_flags: ClassAccessFlags,
    pub version: Version,
    pub constants: ConstantPool,
    pub fields: Vec<ProgramField>,
    pub methods: Vec<ProgramMethod>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramField {
    pub access_flags: FieldAccessFlags,
    pub name: String,
    pub descriptor: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramMethod {
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: String,

    /// Absent for `native` and `abstract` methods
    pub code: Option<CodeAttribute>,
}

/// Stable identity of a method across the whole program
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MethodRef {
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodRef {
    pub fn new(class: &str, name: &str, descriptor: &str) -> MethodRef {
        MethodRef {
            class: class.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        }
    }
}

/// Renders as `class.name(descriptor)`
impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class, self.name, self.descriptor)
    }
}

impl ProgramClass {
    pub fn new(name: &str, super_class: Option<&str>, version: Version) -> ProgramClass {
        ProgramClass {
            name: name.to_owned(),
            super_class: super_class.map(str::to_owned),
            interfaces: vec![],
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            version,
            constants: ConstantPool::new(),
            fields: vec![],
            methods: vec![],
        }
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    pub fn package(&self) -> &str {
        package_name(&self.name)
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&ProgramMethod> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    pub fn find_method_mut(&mut self, name: &str, descriptor: &str) -> Option<&mut ProgramMethod> {
        self.methods
            .iter_mut()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<&ProgramField> {
        self.fields
            .iter()
            .find(|field| field.name == name && field.descriptor == descriptor)
    }

    pub fn method_ref(&self, method: &ProgramMethod) -> MethodRef {
        MethodRef::new(&self.name, &method.name, &method.descriptor)
    }

    /// Does the class have a static initializer?
    pub fn has_class_initializer(&self) -> bool {
        self.methods
            .iter()
            .any(ProgramMethod::is_class_initializer)
    }
}

impl ProgramMethod {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn is_class_initializer(&self) -> bool {
        self.name == "<clinit>"
    }
}

/// Package part of a binary class name (empty for the default package)
pub fn package_name(class_name: &str) -> &str {
    class_name.rsplit_once('/').map_or("", |(package, _)| package)
}

/// All of the program classes, by name
///
/// Classes outside of the pool (eg. the runtime library) are treated as opaque: members resolved
/// to them are assumed accessible and their code is never inlined.
#[derive(Clone, Debug, Default)]
pub struct ClassPool {
    classes: BTreeMap<String, ProgramClass>,
}

impl ClassPool {
    pub fn new() -> ClassPool {
        ClassPool::default()
    }

    pub fn insert(&mut self, class: ProgramClass) -> Option<ProgramClass> {
        self.classes.insert(class.name.clone(), class)
    }

    pub fn get(&self, class_name: &str) -> Option<&ProgramClass> {
        self.classes.get(class_name)
    }

    pub fn get_mut(&mut self, class_name: &str) -> Option<&mut ProgramClass> {
        self.classes.get_mut(class_name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Classes, ordered by name
    pub fn classes(&self) -> impl Iterator<Item = &ProgramClass> {
        self.classes.values()
    }

    pub fn classes_mut(&mut self) -> impl Iterator<Item = &mut ProgramClass> {
        self.classes.values_mut()
    }

    /// Method with exactly this identity
    pub fn method(&self, method: &MethodRef) -> Option<(&ProgramClass, &ProgramMethod)> {
        let class = self.get(&method.class)?;
        let found = class.find_method(&method.name, &method.descriptor)?;
        Some((class, found))
    }

    /// Superclasses of a class (not including the class itself), as far as they are in the pool
    pub fn superclasses<'a>(&'a self, class_name: &str) -> impl Iterator<Item = &'a ProgramClass> {
        let mut next = self
            .get(class_name)
            .and_then(|class| class.super_class.as_deref())
            .and_then(|name| self.get(name));
        std::iter::from_fn(move || {
            let current = next.take()?;
            next = current
                .super_class
                .as_deref()
                .and_then(|name| self.get(name));
            Some(current)
        })
    }

    /// Find the method a symbolic reference resolves to, searching up the superclass chain
    pub fn resolve_method(
        &self,
        class_name: &str,
        name: &str,
        descriptor: &str,
    ) -> Option<(&ProgramClass, &ProgramMethod)> {
        let class = self.get(class_name)?;
        std::iter::once(class)
            .chain(self.superclasses(class_name))
            .find_map(|class| Some((class, class.find_method(name, descriptor)?)))
    }

    /// Find the field a symbolic reference resolves to, searching up the superclass chain
    pub fn resolve_field(
        &self,
        class_name: &str,
        name: &str,
        descriptor: &str,
    ) -> Option<(&ProgramClass, &ProgramField)> {
        let class = self.get(class_name)?;
        std::iter::once(class)
            .chain(self.superclasses(class_name))
            .find_map(|class| Some((class, class.find_field(name, descriptor)?)))
    }

    /// Is `class_name` a strict subclass of `ancestor`?
    pub fn is_subclass_of(&self, class_name: &str, ancestor: &str) -> bool {
        if class_name == ancestor {
            return false;
        }
        let direct_super = self
            .get(class_name)
            .and_then(|class| class.super_class.as_deref());
        direct_super == Some(ancestor)
            || self
                .superclasses(class_name)
                .any(|class| class.super_class.as_deref() == Some(ancestor))
    }
}

#[cfg(test)]
mod class_pool_tests {
    use super::*;

    fn method(name: &str, descriptor: &str) -> ProgramMethod {
        ProgramMethod {
            access_flags: MethodAccessFlags::PUBLIC,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            code: None,
        }
    }

    fn hierarchy() -> ClassPool {
        let mut pool = ClassPool::new();
        let mut base = ProgramClass::new("p/Base", Some("java/lang/Object"), Version::JAVA8);
        base.methods.push(method("shared", "()V"));
        pool.insert(base);
        pool.insert(ProgramClass::new("p/Middle", Some("p/Base"), Version::JAVA8));
        let mut leaf = ProgramClass::new("q/Leaf", Some("p/Middle"), Version::JAVA8);
        leaf.methods.push(method("own", "()I"));
        pool.insert(leaf);
        pool
    }

    #[test]
    fn resolution_walks_superclasses() {
        let pool = hierarchy();
        let (class, found) = pool.resolve_method("q/Leaf", "shared", "()V").unwrap();
        assert_eq!(class.name, "p/Base");
        assert_eq!(found.name, "shared");
        assert!(pool.resolve_method("q/Leaf", "shared", "()I").is_none());
        assert!(pool.resolve_method("java/lang/Object", "hashCode", "()I").is_none());
    }

    #[test]
    fn subclass_queries() {
        let pool = hierarchy();
        assert!(pool.is_subclass_of("q/Leaf", "p/Base"));
        assert!(pool.is_subclass_of("q/Leaf", "p/Middle"));
        assert!(pool.is_subclass_of("q/Leaf", "java/lang/Object"));
        assert!(!pool.is_subclass_of("p/Base", "q/Leaf"));
        assert!(!pool.is_subclass_of("p/Base", "p/Base"));
        assert_eq!(
            pool.superclasses("q/Leaf")
                .map(|class| class.name.as_str())
                .collect::<Vec<_>>(),
            vec!["p/Middle", "p/Base"]
        );
    }

    #[test]
    fn names() {
        assert_eq!(package_name("p/q/Leaf"), "p/q");
        assert_eq!(package_name("Leaf"), "");
        assert_eq!(
            MethodRef::new("p/Base", "shared", "()V").to_string(),
            "p/Base.shared()V"
        );
    }
}
