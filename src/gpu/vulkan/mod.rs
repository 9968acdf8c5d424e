mod error;
pub use error::*;

mod error_sink;
pub use error_sink::*;

pub mod device_selector;
pub use device_selector::*;

pub mod structs;
pub use structs::*;

mod command_pool;
pub use command_pool::CommandPool;

pub mod memory;
pub use memory::*;

mod descriptor_sets;

mod push_constants;
pub use push_constants::*;

mod pipelines;
pub use pipelines::*;

mod commands;
pub use commands::*;

use crate::utils::QueueSlots;
use ash::*;
use std::{
    cell::RefCell,
    ffi::{c_char, c_void, CStr, CString},
};

/// Names of debugging layers that should be enabled when validation is requested.
/// Only includes the standard Vulkan validation layer to avoid enabling any extra layers.
pub const DEBUG_LAYER_NAMES: [*const c_char; 1] =
    [b"VK_LAYER_KHRONOS_validation\0".as_ptr() as *const c_char];

const ENGINE_NAME: &[u8] = b"dashi-compute\0";

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || unsafe { (*p_callback_data).p_message.is_null() } {
        return vk::FALSE;
    }
    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) }.to_string_lossy();
    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", kind = ?message_type, "{}", message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", kind = ?message_type, "{}", message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::debug!(target: "vulkan", kind = ?message_type, "{}", message);
    } else {
        tracing::trace!(target: "vulkan", kind = ?message_type, "{}", message);
    }
    vk::FALSE
}

/// Query the instance-level Vulkan version exposed by the loader.
pub fn vulkan_version() -> Result<VulkanVersion> {
    let entry = unsafe { Entry::load() }?;
    let version = entry
        .try_enumerate_instance_version()
        .internal("vkEnumerateInstanceVersion")?
        .unwrap_or(vk::API_VERSION_1_0);
    Ok(VulkanVersion::from_minor(vk::api_version_minor(version)))
}

fn validation_requested(info: &ContextInfo) -> bool {
    info.enable_validation.unwrap_or_else(|| {
        std::env::var("DASHI_VALIDATION")
            .map(|v| v == "1")
            .unwrap_or(false)
    })
}

struct DeviceParts {
    pdevice: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    family: u32,
    queue_count: u32,
    device: ash::Device,
    pool: CommandPool,
}

/// Owner of the Vulkan device and the compute queues handed out to
/// [`CommandQueue`]s.
///
/// Pipelines and command queues borrow the context, so it can only be
/// destroyed once all of them are gone. The queue-slot table is not
/// synchronized; the context is `!Sync` and every call that touches the table
/// must come from the thread that currently owns it.
pub struct Context {
    _entry: ash::Entry,
    pub(super) instance: ash::Instance,
    pub(super) pdevice: vk::PhysicalDevice,
    pub(super) device: ash::Device,
    pub(super) properties: vk::PhysicalDeviceProperties,
    pub(super) memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(super) device_info: DeviceInfo,
    pub(super) queue_family: u32,
    pub(super) queue_count: u32,
    pub(super) slots: RefCell<QueueSlots>,
    pub(super) pool: CommandPool,
    pub(super) errors: ErrorSink,
    pub(super) debug_utils: Option<ash::extensions::ext::DebugUtils>,
    pub(super) debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.device_info)
            .field("queue_family", &self.queue_family)
            .field("queue_count", &self.queue_count)
            .field("busy_queues", &self.busy_queue_count())
            .finish()
    }
}

impl Context {
    /// Create the instance, pick a device and its first compute-capable queue
    /// family, and open every queue of that family.
    ///
    /// A discrete GPU is preferred; otherwise the first enumerated device is
    /// used. Validation layers are enabled by [`ContextInfo::enable_validation`]
    /// or, when unset, by `DASHI_VALIDATION=1`.
    pub fn new(info: &ContextInfo) -> Result<Self> {
        let res = Self::create(info);
        if let Err(err) = &res {
            tracing::error!(code = err.code() as i32, "context creation failed: {}", err);
        }
        res
    }

    fn create(info: &ContextInfo) -> Result<Self> {
        let enable_validation = validation_requested(info);
        let entry = unsafe { Entry::load() }?;
        let instance = Self::create_instance(&entry, info, enable_validation)?;

        let (debug_utils, debug_messenger) = if enable_validation {
            Self::create_messenger(&entry, &instance)
        } else {
            (None, None)
        };

        let parts = match Self::init_device(&instance) {
            Ok(parts) => parts,
            Err(err) => {
                unsafe {
                    if let (Some(utils), Some(messenger)) = (&debug_utils, debug_messenger) {
                        utils.destroy_debug_utils_messenger(messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(err);
            }
        };

        let device_info = DeviceInfo::from(parts.properties);
        tracing::info!(
            device = %device_info,
            family = parts.family,
            queues = parts.queue_count,
            validation = enable_validation,
            "created compute context"
        );

        Ok(Self {
            _entry: entry,
            instance,
            pdevice: parts.pdevice,
            device: parts.device,
            properties: parts.properties,
            memory_properties: parts.memory_properties,
            device_info,
            queue_family: parts.family,
            queue_count: parts.queue_count,
            slots: RefCell::new(QueueSlots::new(parts.queue_count as usize)),
            pool: parts.pool,
            errors: ErrorSink::new(),
            debug_utils,
            debug_messenger,
        })
    }

    fn create_instance(
        entry: &ash::Entry,
        info: &ContextInfo,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name = CString::new(info.application_name.as_str())
            .map_err(|_| GPUError::InvalidArgument("application name contains a NUL byte"))?;
        // SAFETY: static null-terminated string.
        let engine_name = unsafe { CStr::from_bytes_with_nul_unchecked(ENGINE_NAME) };

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(info.application_version)
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0)
            .build();

        let mut inst_exts = Vec::new();
        let mut inst_layers = Vec::new();
        if enable_validation {
            inst_exts.push(ash::extensions::ext::DebugUtils::name().as_ptr());
            let available_layers = entry
                .enumerate_instance_layer_properties()
                .creating("instance")?;
            for &layer in &DEBUG_LAYER_NAMES {
                let name = unsafe { CStr::from_ptr(layer) };
                if available_layers
                    .iter()
                    .any(|prop| unsafe { CStr::from_ptr(prop.layer_name.as_ptr()) == name })
                {
                    inst_layers.push(layer);
                } else {
                    tracing::warn!(layer = ?name, "validation layer not available");
                }
            }
        }

        unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::builder()
                    .application_info(&app_info)
                    .enabled_extension_names(&inst_exts)
                    .enabled_layer_names(&inst_layers)
                    .build(),
                None,
            )
        }
        .creating("instance")
    }

    fn create_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> (
        Option<ash::extensions::ext::DebugUtils>,
        Option<vk::DebugUtilsMessengerEXT>,
    ) {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);
        let messenger_ci = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vulkan_debug_callback));
        match unsafe { debug_utils.create_debug_utils_messenger(&messenger_ci, None) } {
            Ok(messenger) => (Some(debug_utils), Some(messenger)),
            Err(res) => {
                tracing::warn!(result = %res, "unable to create debug messenger");
                (None, None)
            }
        }
    }

    fn init_device(instance: &ash::Instance) -> Result<DeviceParts> {
        let pdevices =
            unsafe { instance.enumerate_physical_devices() }.creating("physical device")?;
        let all_props: Vec<vk::PhysicalDeviceProperties> = pdevices
            .iter()
            .map(|pd| unsafe { instance.get_physical_device_properties(*pd) })
            .collect();
        let kinds: Vec<DeviceType> = all_props.iter().map(|p| p.device_type.into()).collect();
        let selected = select_device(&kinds).ok_or(GPUError::creation(
            "physical device",
            vk::Result::ERROR_INCOMPATIBLE_DRIVER,
        ))?;
        let pdevice = pdevices[selected];
        let properties = all_props[selected];

        let families = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        let (family, queue_count) = select_compute_family(&families).ok_or(
            GPUError::creation("compute queue family", vk::Result::ERROR_FEATURE_NOT_PRESENT),
        )?;

        let priorities = queue_priorities(queue_count);
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(family)
            .queue_priorities(&priorities)
            .build()];

        let device = unsafe {
            instance.create_device(
                pdevice,
                &vk::DeviceCreateInfo::builder()
                    .queue_create_infos(&queue_infos)
                    .build(),
                None,
            )
        }
        .creating("logical device")?;

        let pool = match CommandPool::new(&device, family) {
            Ok(pool) => pool,
            Err(err) => {
                unsafe { device.destroy_device(None) };
                return Err(err);
            }
        };

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(pdevice) };

        Ok(DeviceParts {
            pdevice,
            properties,
            memory_properties,
            family,
            queue_count,
            device,
            pool,
        })
    }

    /// Register the callback that receives every failure reported by this
    /// context and the pipelines/commands created from it. Replaces any
    /// previously registered callback.
    pub fn set_error_callback<F>(&self, f: F)
    where
        F: Fn(ErrorCode, &str) + Send + 'static,
    {
        self.errors.set_callback(f);
    }

    pub fn clear_error_callback(&self) {
        self.errors.clear_callback();
    }

    pub fn error_sink(&self) -> &ErrorSink {
        &self.errors
    }

    pub(crate) fn report(&self, err: GPUError) -> GPUError {
        self.errors.report(err)
    }

    /// Lowest-indexed free queue slot. Does not mark it busy.
    pub fn acquire_queue_slot(&self) -> Result<u32> {
        self.slots
            .borrow()
            .next_free()
            .ok_or_else(|| self.report(GPUError::QueuesExhausted(self.queue_count)))
    }

    pub fn mark_slot_busy(&self, index: u32) -> Result<()> {
        if self.slots.borrow_mut().mark_busy(index) {
            Ok(())
        } else {
            Err(self.report(GPUError::InvalidArgument("queue slot out of range")))
        }
    }

    pub fn mark_slot_free(&self, index: u32) -> Result<()> {
        if self.slots.borrow_mut().mark_free(index) {
            Ok(())
        } else {
            Err(self.report(GPUError::InvalidArgument("queue slot out of range")))
        }
    }

    /// Return every command buffer of the context to its initial state and
    /// mark every queue slot free.
    ///
    /// Commands borrow the context, so this can only be called once all of
    /// them are gone. What remains to clean up are slots marked busy by hand
    /// with [`Self::mark_slot_busy`] and memory the pool kept for recycled
    /// buffers.
    pub fn reset_commands(&mut self) -> Result<()> {
        let busy = self.slots.get_mut().busy_count();
        self.slots.get_mut().free_all();
        self.pool.reset_all().map_err(|err| self.report(err))?;
        tracing::debug!(freed = busy, "reset instance commands");
        Ok(())
    }

    pub fn is_slot_busy(&self, index: u32) -> bool {
        self.slots.borrow().is_busy(index)
    }

    pub fn busy_queue_count(&self) -> usize {
        self.slots.borrow().busy_count()
    }

    pub fn queue_count(&self) -> u32 {
        self.queue_count
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Query hardware limits relevant to compute work.
    ///
    /// Useful for sizing push-constant blocks and dispatch counts so shaders
    /// never exceed what the device supports.
    pub fn limits(&self) -> ContextLimits {
        let limits = &self.properties.limits;

        ContextLimits {
            queue_count: self.queue_count,
            max_push_constant_size: limits.max_push_constants_size,
            max_compute_work_group_count: limits.max_compute_work_group_count,
            max_uniform_buffer_range: limits.max_uniform_buffer_range,
            max_storage_buffer_range: limits.max_storage_buffer_range,
        }
    }

    pub fn raw_instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn raw_device(&self) -> &ash::Device {
        &self.device
    }

    pub fn raw_physical_device(&self) -> vk::PhysicalDevice {
        self.pdevice
    }

    pub fn raw_command_pool(&self) -> vk::CommandPool {
        self.pool.raw()
    }

    pub(crate) fn queue(&self, index: u32) -> vk::Queue {
        unsafe { self.device.get_device_queue(self.queue_family, index) }
    }

    pub(crate) fn pool(&self) -> &CommandPool {
        &self.pool
    }

    pub(crate) fn set_name<T>(&self, obj: T, name: &str, t: vk::ObjectType)
    where
        T: ash::vk::Handle,
    {
        if name.is_empty() {
            return;
        }
        if let Some(utils) = &self.debug_utils {
            let Ok(name) = CString::new(name) else {
                return;
            };
            let res = unsafe {
                utils.set_debug_utils_object_name(
                    self.device.handle(),
                    &vk::DebugUtilsObjectNameInfoEXT::builder()
                        .object_name(&name)
                        .object_type(t)
                        .object_handle(ash::vk::Handle::as_raw(obj))
                        .build(),
                )
            };
            if let Err(res) = res {
                tracing::warn!(result = %res, "unable to set debug name");
            }
        }
    }

    /// Tear the context down: slot table, command pool, device, instance.
    ///
    /// # Prerequisites
    /// - Every pipeline and command queue created from this context must have
    ///   been destroyed (enforced by their borrows).
    pub fn destroy(self) {
        drop(self);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let busy = self.busy_queue_count();
        if busy != 0 {
            tracing::warn!(busy, "destroying context with queue slots still marked busy");
        }
        self.slots.borrow_mut().clear();

        unsafe {
            if let Err(res) = self.device.device_wait_idle() {
                tracing::warn!(result = %res, "device did not go idle before teardown");
            }
        }

        self.pool.destroy();

        unsafe {
            self.device.destroy_device(None);
            if let (Some(utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger.take())
            {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        tracing::info!(device = %self.device_info, "destroyed compute context");
    }
}
