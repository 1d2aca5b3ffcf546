//! Declarative native type layouts
//!
//! A [`TypeLayout`] names typed attributes at byte offsets, exported
//! functions taking a this-pointer, and vtable slots. An [`Instance`] is a
//! [`Pointer`] viewed through a layout; its methods come back as
//! [`BoundMethod`]s that pass the instance address as the first argument.
//!
//! Members may name a converter: a registered layout that pointer results
//! are wrapped in, so `player.get("weapon")` yields a `Weapon` instance.
//! Members without one use the manager's default converter, if set.

use crate::errors::{Error, Result};
use crate::hooks::{HookManager, HookRegistry};
use crate::interop::{CallContext, CallVm, Convention, Function, Kind, Signature, Value};
use crate::memory::Pointer;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Read/write permission of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeAccess {
    Read,
    Write,
    #[default]
    ReadWrite,
}

impl AttributeAccess {
    pub const fn readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub const fn writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Typed field at a byte offset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "type")]
    pub kind: Kind,
    pub offset: isize,
    /// Strings only: the field holds a `char*` instead of inline chars
    #[serde(default)]
    pub is_ptr: bool,
    /// Strings only: buffer capacity for writes (allocator size if unset)
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub access: AttributeAccess,
    /// Layout to wrap a pointer result in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter: Option<String>,
}

/// Symbol names of one function per platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    #[serde(default)]
    pub linux: Option<String>,
    #[serde(default)]
    pub windows: Option<String>,
    #[serde(default)]
    pub macos: Option<String>,
}

impl SymbolTable {
    /// Symbol for the running platform
    pub fn current(&self) -> Option<&str> {
        if cfg!(windows) {
            self.windows.as_deref()
        } else if cfg!(target_os = "macos") {
            // Mach-O symbols usually match the ELF ones
            self.macos.as_deref().or(self.linux.as_deref())
        } else {
            self.linux.as_deref()
        }
    }
}

/// Exported function described by binary, symbol, convention and signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub binary: String,
    #[serde(flatten)]
    pub symbols: SymbolTable,
    #[serde(default)]
    pub convention: Convention,
    pub parameters: Signature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter: Option<String>,
}

/// Method reached through the vtable at offset 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualFunctionSpec {
    pub index: usize,
    #[serde(default)]
    pub convention: Convention,
    pub parameters: Signature,
    /// Shift the index for the Itanium ABI on Linux
    #[serde(default = "default_true")]
    pub platform_check: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Turns a [`FunctionSpec`] into a callable address
pub trait SymbolResolver {
    fn resolve(&self, spec: &FunctionSpec) -> Result<Function>;
}

impl<F> SymbolResolver for F
where
    F: Fn(&FunctionSpec) -> Result<Function>,
{
    fn resolve(&self, spec: &FunctionSpec) -> Result<Function> {
        self(spec)
    }
}

/// Layout of one native type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeLayout {
    /// Filled in by the [`TypeManager`]
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionSpec>,
    #[serde(default)]
    pub virtual_functions: BTreeMap<String, VirtualFunctionSpec>,
}

impl TypeLayout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    pub fn with_function(mut self, name: impl Into<String>, spec: FunctionSpec) -> Self {
        self.functions.insert(name.into(), spec);
        self
    }

    pub fn with_virtual_function(mut self, name: impl Into<String>, spec: VirtualFunctionSpec) -> Self {
        self.virtual_functions.insert(name.into(), spec);
        self
    }

    fn unknown(&self, name: &str) -> Error {
        Error::UnknownMember {
            owner: self.name.clone(),
            name: name.to_string(),
        }
    }
}

/// Attribute or call result, wrapped by its converter when it has one
#[derive(Debug, Clone)]
pub enum Member {
    Value(Value),
    Instance(Instance),
}

impl Member {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Instance(_) => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Self::Instance(instance) => Some(instance),
            Self::Value(_) => None,
        }
    }

    /// Plain value; an instance gives its address
    pub fn into_value(self) -> Value {
        match self {
            Self::Value(value) => value,
            Self::Instance(instance) => Value::Pointer(instance.pointer),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }
}

impl PartialEq<Value> for Member {
    fn eq(&self, other: &Value) -> bool {
        self.as_value() == Some(other)
    }
}

/// Pointer viewed through a layout
#[derive(Debug, Clone)]
pub struct Instance {
    pointer: Pointer,
    layout: Arc<TypeLayout>,
    types: TypeManager,
}

impl Instance {
    /// View `pointer` through `layout`; converters find nothing to wrap with
    ///
    /// # Safety
    /// `pointer` must address a live object laid out as `layout` describes,
    /// for as long as the instance or anything derived from it is used.
    /// That covers its vtable and every pointer a converter wraps.
    pub unsafe fn new(pointer: Pointer, layout: Arc<TypeLayout>) -> Self {
        Self::with_types(pointer, layout, TypeManager::new())
    }

    /// # Safety
    /// As [`Instance::new`]; converters resolve through `types`.
    pub unsafe fn with_types(pointer: Pointer, layout: Arc<TypeLayout>, types: TypeManager) -> Self {
        Self {
            pointer,
            layout,
            types,
        }
    }

    pub fn pointer(&self) -> Pointer {
        self.pointer
    }

    pub fn layout(&self) -> &TypeLayout {
        &self.layout
    }

    fn attribute(&self, name: &str) -> Result<&Attribute> {
        self.layout
            .attributes
            .get(name)
            .ok_or_else(|| self.layout.unknown(name))
    }

    /// Read an attribute
    pub fn get(&self, name: &str) -> Result<Member> {
        let attr = self.attribute(name)?;
        if !attr.access.readable() {
            return Err(Error::AttributeAccess {
                name: name.to_string(),
                write: false,
            });
        }

        // SAFETY: the constructor vouches for every declared attribute
        let value = unsafe {
            match attr.kind {
                Kind::String => match self.pointer.get_string(attr.offset, attr.is_ptr)? {
                    Some(text) => Value::string(&text)?,
                    None => Value::None,
                },
                kind => self.pointer.get_value(kind, attr.offset)?,
            }
        };
        // SAFETY: pointer attributes that name a converter hold that type
        unsafe { self.types.convert(attr.converter.as_deref(), value) }
    }

    /// Write an attribute
    pub fn set(&self, name: &str, value: &Value) -> Result<()> {
        let attr = self.attribute(name)?;
        if !attr.access.writable() {
            return Err(Error::AttributeAccess {
                name: name.to_string(),
                write: true,
            });
        }

        // SAFETY: the constructor vouches for every declared attribute
        unsafe {
            match attr.kind {
                Kind::String => {
                    let text = value.as_str().ok_or_else(|| Error::ArgumentType {
                        index: 0,
                        expected: Kind::String,
                        found: value.type_name().to_string(),
                    })?;
                    self.pointer.set_string(text, attr.size, attr.offset, attr.is_ptr)
                }
                kind => self.pointer.set_value(kind, value, attr.offset),
            }
        }
    }

    /// Exported method bound to this instance
    pub fn method(&self, name: &str, resolver: &dyn SymbolResolver) -> Result<BoundMethod> {
        let spec = self
            .layout
            .functions
            .get(name)
            .ok_or_else(|| self.layout.unknown(name))?;
        let function = resolver.resolve(spec)?;
        debug!(target: "memory", owner = %self.layout.name, method = name, "bound method");
        Ok(self.bind(function, spec.converter.clone()))
    }

    /// Virtual method bound to this instance
    pub fn virtual_method(&self, name: &str) -> Result<BoundMethod> {
        let spec = self
            .layout
            .virtual_functions
            .get(name)
            .ok_or_else(|| self.layout.unknown(name))?;
        // SAFETY: the constructor vouches for the vtable and its entries
        let function = unsafe {
            let address = self.pointer.get_virtual_func(spec.index, spec.platform_check)?;
            Function::new(address, spec.convention, spec.parameters.clone())
        };
        Ok(self.bind(function, spec.converter.clone()))
    }

    fn bind(&self, function: Function, converter: Option<String>) -> BoundMethod {
        BoundMethod {
            function,
            this: self.pointer,
            converter: Some((self.types.clone(), converter)),
        }
    }
}

/// Function with its first argument fixed to a this-pointer
#[derive(Debug, Clone)]
pub struct BoundMethod {
    function: Function,
    this: Pointer,
    converter: Option<(TypeManager, Option<String>)>,
}

impl BoundMethod {
    /// Bind without conversion; results come back as plain values
    pub fn new(function: Function, this: Pointer) -> Self {
        Self {
            function,
            this,
            converter: None,
        }
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn this(&self) -> Pointer {
        self.this
    }

    fn with_this(&self, args: &[Value]) -> Vec<Value> {
        std::iter::once(Value::Pointer(self.this))
            .chain(args.iter().cloned())
            .collect()
    }

    fn convert(&self, value: Value) -> Result<Member> {
        match &self.converter {
            // SAFETY: a method naming a converter returns that type
            Some((types, name)) => unsafe { types.convert(name.as_deref(), value) },
            None => Ok(Member::Value(value)),
        }
    }

    pub fn call<V: CallVm>(&self, ctx: &mut CallContext<V>, args: &[Value]) -> Result<Member> {
        let value = self.function.call(ctx, &self.with_this(args))?;
        self.convert(value)
    }

    pub fn call_default(&self, args: &[Value]) -> Result<Member> {
        let value = self.function.call_default(&self.with_this(args))?;
        self.convert(value)
    }

    pub fn call_trampoline<V: CallVm, M: HookManager>(
        &self,
        ctx: &mut CallContext<V>,
        registry: &HookRegistry<M>,
        args: &[Value],
    ) -> Result<Member> {
        let value = self.function.call_trampoline(ctx, registry, &self.with_this(args))?;
        self.convert(value)
    }
}

#[derive(Debug, Default)]
struct Types {
    layouts: HashMap<String, Arc<TypeLayout>>,
    default_converter: Option<String>,
}

/// Registry of named layouts
///
/// Clones share the same registry, so layouts added later are visible to
/// instances created earlier.
#[derive(Debug, Clone, Default)]
pub struct TypeManager {
    inner: Arc<RwLock<Types>>,
}

impl TypeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `layout` under `name`
    ///
    /// An existing entry is replaced only with `override_existing`.
    pub fn add_type(
        &self,
        name: &str,
        mut layout: TypeLayout,
        override_existing: bool,
    ) -> Result<Arc<TypeLayout>> {
        let mut types = self.inner.write();
        if !override_existing && types.layouts.contains_key(name) {
            return Err(Error::DuplicateType {
                name: name.to_string(),
            });
        }
        layout.name = name.to_string();
        let layout = Arc::new(layout);
        types.layouts.insert(name.to_string(), Arc::clone(&layout));
        Ok(layout)
    }

    pub fn get(&self, name: &str) -> Option<Arc<TypeLayout>> {
        self.inner.read().layouts.get(name).cloned()
    }

    fn layout(&self, name: &str) -> Result<Arc<TypeLayout>> {
        self.get(name).ok_or_else(|| Error::UnknownMember {
            owner: "TypeManager".to_string(),
            name: name.to_string(),
        })
    }

    /// Converter for members that name none; `None` keeps plain values
    pub fn set_default_converter(&self, name: Option<&str>) {
        self.inner.write().default_converter = name.map(str::to_string);
    }

    pub fn default_converter(&self) -> Option<String> {
        self.inner.read().default_converter.clone()
    }

    /// View `pointer` as an instance of the named type
    ///
    /// # Safety
    /// As [`Instance::new`].
    pub unsafe fn instance(&self, name: &str, pointer: Pointer) -> Result<Instance> {
        let layout = self.layout(name)?;
        Ok(Instance::with_types(pointer, layout, self.clone()))
    }

    /// Wrap a non-null pointer result with the named (or default) converter
    ///
    /// Other values, and every value when no converter applies, come back
    /// unchanged.
    ///
    /// # Safety
    /// A non-null `Value::Pointer` must satisfy [`Instance::new`] for the
    /// converter's layout.
    pub unsafe fn convert(&self, converter: Option<&str>, value: Value) -> Result<Member> {
        let name = match converter {
            Some(name) => name.to_string(),
            None => match self.default_converter() {
                Some(name) => name,
                None => return Ok(Member::Value(value)),
            },
        };
        match value {
            Value::Pointer(pointer) if pointer.is_valid() => {
                Ok(Member::Instance(self.instance(&name, pointer)?))
            }
            value => Ok(Member::Value(value)),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.read().layouts.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().layouts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(kind: Kind, offset: isize) -> Attribute {
        Attribute {
            kind,
            offset,
            is_ptr: false,
            size: None,
            access: AttributeAccess::ReadWrite,
            converter: None,
        }
    }

    fn player_layout() -> TypeLayout {
        TypeLayout::new("Player")
            .with_attribute("health", attr(Kind::Int, 0))
            .with_attribute("speed", attr(Kind::Float, 4))
            .with_attribute(
                "name",
                Attribute {
                    size: Some(16),
                    ..attr(Kind::String, 8)
                },
            )
            .with_attribute(
                "id",
                Attribute {
                    access: AttributeAccess::Read,
                    ..attr(Kind::UShort, 24)
                },
            )
            .with_attribute(
                "secret",
                Attribute {
                    access: AttributeAccess::Write,
                    ..attr(Kind::Int, 28)
                },
            )
    }

    #[test]
    fn test_attributes_through_buffer() {
        let mut buffer = Pointer::alloc(32).unwrap();
        let player = unsafe { Instance::new(buffer, Arc::new(player_layout())) };

        player.set("health", &Value::Int(100)).unwrap();
        player.set("speed", &Value::Double(1.5)).unwrap();
        player.set("name", &Value::string("bob").unwrap()).unwrap();

        assert_eq!(player.get("health").unwrap(), Value::Int(100));
        assert_eq!(player.get("speed").unwrap(), Value::Float(1.5));
        assert_eq!(player.get("name").unwrap().as_str(), Some("bob"));
        assert_eq!(unsafe { buffer.read::<i32>(0) }.unwrap(), 100);

        unsafe { buffer.dealloc() };
    }

    #[test]
    fn test_access_flags() {
        let mut buffer = Pointer::alloc(32).unwrap();
        let player = unsafe { Instance::new(buffer, Arc::new(player_layout())) };

        assert_eq!(player.get("id").unwrap(), Value::UShort(0));
        assert!(matches!(
            player.set("id", &Value::Int(1)),
            Err(Error::AttributeAccess { write: true, .. })
        ));
        player.set("secret", &Value::Int(5)).unwrap();
        assert!(matches!(
            player.get("secret"),
            Err(Error::AttributeAccess { write: false, .. })
        ));
        assert!(matches!(player.get("mana"), Err(Error::UnknownMember { .. })));

        unsafe { buffer.dealloc() };
    }

    #[test]
    fn test_string_overflow_uses_declared_size() {
        let mut buffer = Pointer::alloc(32).unwrap();
        let player = unsafe { Instance::new(buffer, Arc::new(player_layout())) };
        let err = player
            .set("name", &Value::string("a name far too long").unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::BufferOverflow { capacity: 16, .. }));
        unsafe { buffer.dealloc() };
    }

    extern "C" fn get_health(this: *const i32) -> i32 {
        unsafe { *this }
    }

    extern "C" fn scaled(this: *const i32, factor: i32) -> i32 {
        unsafe { *this * factor }
    }

    #[test]
    fn test_bound_methods() {
        let health: i32 = 7;
        let this = unsafe { Pointer::from_raw(&health as *const i32) };

        let layout = TypeLayout::new("Thing").with_function(
            "scaled",
            FunctionSpec {
                binary: "self".to_string(),
                symbols: SymbolTable::default(),
                convention: Convention::Cdecl,
                parameters: Signature::parse("pi)i").unwrap(),
                converter: None,
            },
        );
        let resolver = |spec: &FunctionSpec| -> Result<Function> {
            // SAFETY: `scaled` matches "pi)i"
            unsafe {
                let p = Pointer::from_raw(scaled as *const ());
                Ok(Function::new(p, spec.convention, spec.parameters.clone()))
            }
        };

        let instance = unsafe { Instance::new(this, Arc::new(layout)) };
        let method = instance.method("scaled", &resolver).unwrap();
        assert_eq!(method.this(), this);
        assert_eq!(method.call_default(&[Value::Int(3)]).unwrap(), Value::Int(21));
        assert!(instance.method("missing", &resolver).is_err());
    }

    #[test]
    fn test_virtual_method() {
        let vtable: [usize; 2] = [get_health as usize, get_health as usize];
        #[repr(C)]
        struct Object {
            vtable: *const usize,
            health: i32,
        }
        let object = Object {
            vtable: vtable.as_ptr(),
            health: 12,
        };
        let this = unsafe { Pointer::from_raw(&object as *const Object) };

        let layout = TypeLayout::new("Object").with_virtual_function(
            "health",
            VirtualFunctionSpec {
                index: 0,
                convention: Convention::Cdecl,
                parameters: Signature::parse("p)i").unwrap(),
                platform_check: true,
                converter: None,
            },
        );
        let instance = unsafe { Instance::new(this, Arc::new(layout)) };
        let method = instance.virtual_method("health").unwrap();
        assert_eq!(method.function().address(), get_health as usize);

        // Rebind with `this` on the health field
        let health_view = BoundMethod::new(method.function().clone(), this.add(std::mem::size_of::<usize>() as isize));
        assert_eq!(health_view.call_default(&[]).unwrap(), Value::Int(object.health));
    }

    #[test]
    fn test_type_manager_duplicates() {
        let manager = TypeManager::new();
        manager.add_type("Player", player_layout(), false).unwrap();
        assert!(matches!(
            manager.add_type("Player", TypeLayout::default(), false),
            Err(Error::DuplicateType { .. })
        ));
        let replaced = manager.add_type("Player", TypeLayout::default(), true).unwrap();
        assert!(replaced.attributes.is_empty());
        assert_eq!(replaced.name, "Player");

        unsafe {
            assert!(manager.instance("Player", Pointer::null()).is_ok());
            assert!(manager.instance("Ghost", Pointer::null()).is_err());
        }
    }

    #[repr(C)]
    struct Weapon {
        damage: i32,
    }

    #[repr(C)]
    struct Soldier {
        weapon: *const Weapon,
        rank: i32,
    }

    extern "C" fn soldier_weapon(this: *const Soldier) -> *const Weapon {
        unsafe { (*this).weapon }
    }

    fn armoury() -> TypeManager {
        let manager = TypeManager::new();
        manager
            .add_type("Weapon", TypeLayout::new("Weapon").with_attribute("damage", attr(Kind::Int, 0)), false)
            .unwrap();
        manager
            .add_type(
                "Soldier",
                TypeLayout::new("Soldier")
                    .with_attribute(
                        "weapon",
                        Attribute {
                            converter: Some("Weapon".to_string()),
                            ..attr(Kind::Pointer, 0)
                        },
                    )
                    .with_attribute("weapon_address", attr(Kind::Pointer, 0))
                    .with_attribute("rank", attr(Kind::Int, std::mem::size_of::<usize>() as isize))
                    .with_virtual_function(
                        "weapon",
                        VirtualFunctionSpec {
                            index: 0,
                            convention: Convention::Cdecl,
                            parameters: Signature::parse("p)p").unwrap(),
                            platform_check: false,
                            converter: Some("Weapon".to_string()),
                        },
                    ),
                false,
            )
            .unwrap();
        manager
    }

    #[test]
    fn test_converter_wraps_pointer_results() {
        let sword = Weapon { damage: 9 };
        let soldier = Soldier { weapon: &sword, rank: 3 };
        let manager = armoury();
        let instance = unsafe { manager.instance("Soldier", Pointer::from_raw(&soldier as *const Soldier)) }.unwrap();

        let weapon = instance.get("weapon").unwrap();
        let weapon = weapon.as_instance().unwrap();
        assert_eq!(weapon.layout().name, "Weapon");
        assert_eq!(weapon.get("damage").unwrap(), Value::Int(9));

        let address = instance.get("weapon_address").unwrap();
        assert_eq!(address.as_value().and_then(Value::as_pointer), Some(weapon.pointer()));
        assert_eq!(instance.get("rank").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_converter_on_virtual_method_result() {
        let sword = Weapon { damage: 4 };
        let vtable: [usize; 1] = [soldier_weapon as usize];
        #[repr(C)]
        struct Object {
            vtable: *const usize,
            soldier: Soldier,
        }
        let object = Object {
            vtable: vtable.as_ptr(),
            soldier: Soldier { weapon: &sword, rank: 1 },
        };

        // The vtable call gets `this` pointing at the vtable slot, so read
        // the weapon through a method bound to the embedded soldier
        let manager = armoury();
        let this = unsafe { Pointer::from_raw(&object as *const Object) };
        let instance = unsafe { manager.instance("Soldier", this) }.unwrap();
        let method = instance.virtual_method("weapon").unwrap();
        assert_eq!(method.function().address(), soldier_weapon as usize);

        let soldier = this.add(std::mem::size_of::<usize>() as isize);
        let rebound = unsafe { manager.instance("Soldier", soldier) }.unwrap();
        let weapon = BoundMethod {
            this: rebound.pointer(),
            ..method
        }
        .call_default(&[])
        .unwrap();
        assert_eq!(weapon.as_instance().unwrap().get("damage").unwrap(), Value::Int(4));
    }

    #[test]
    fn test_default_converter() {
        let sword = Weapon { damage: 2 };
        let slot: *const Weapon = &sword;
        let manager = armoury();
        manager
            .add_type("Slot", TypeLayout::new("Slot").with_attribute("item", attr(Kind::Pointer, 0)), false)
            .unwrap();
        let instance = unsafe { manager.instance("Slot", Pointer::from_raw(&slot as *const *const Weapon)) }.unwrap();

        assert!(instance.get("item").unwrap().as_value().is_some());

        // Set after the instance exists: the registry is shared
        manager.set_default_converter(Some("Weapon"));
        let item = instance.get("item").unwrap();
        assert_eq!(item.as_instance().unwrap().get("damage").unwrap(), Value::Int(2));

        manager.set_default_converter(Some("Missing"));
        assert!(matches!(instance.get("item"), Err(Error::UnknownMember { .. })));

        manager.set_default_converter(None);
        assert_eq!(manager.default_converter(), None);
        assert!(instance.get("item").unwrap().as_value().is_some());
    }

    #[test]
    fn test_converter_leaves_null_and_scalars() {
        let manager = armoury();
        manager.set_default_converter(Some("Weapon"));
        unsafe {
            assert_eq!(manager.convert(None, Value::Pointer(Pointer::null())).unwrap(), Value::Pointer(Pointer::null()));
            assert_eq!(manager.convert(Some("Weapon"), Value::Int(5)).unwrap(), Value::Int(5));
        }
    }

    #[test]
    fn test_layout_from_toml() {
        let layout: TypeLayout = toml::from_str(
            r#"
            size = 32

            [attributes.health]
            type = "int"
            offset = 0

            [attributes.name]
            type = "string"
            offset = 8
            is_ptr = true
            access = "read"

            [attributes.owner]
            type = "pointer"
            offset = 16
            converter = "Player"

            [virtual_functions.think]
            index = 3
            parameters = "p)v"
            "#,
        )
        .unwrap();

        assert_eq!(layout.size, Some(32));
        assert_eq!(layout.attributes["name"].access, AttributeAccess::Read);
        assert!(layout.attributes["name"].is_ptr);
        assert!(layout.virtual_functions["think"].platform_check);
        assert_eq!(layout.virtual_functions["think"].convention, Convention::Cdecl);
        assert_eq!(layout.attributes["owner"].converter.as_deref(), Some("Player"));
        assert_eq!(layout.attributes["health"].converter, None);
    }
}
