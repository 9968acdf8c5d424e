use ash::vk;

use super::{
    CommandInfo, Context, CreationExt, GPUError, InternalExt, RecordInfo, RecordMode, Result,
};

/// Lifecycle of a [`CommandQueue`].
#[derive(Default, Hash, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandState {
    /// Freshly created, waited on, or reset.
    #[default]
    Idle,
    Recording,
    Recorded,
    /// Handed to the queue; the fence is outstanding.
    Submitted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandOp {
    Begin,
    Record,
    End,
    Run,
    Wait,
    Reset,
}

impl CommandState {
    /// State after `op`, or `None` if `op` is not allowed from `self`.
    pub(crate) fn after(self, op: CommandOp) -> Option<CommandState> {
        use CommandOp::*;
        use CommandState::*;
        match (self, op) {
            (Idle | Recorded, Begin) => Some(Recording),
            (Recording, Record) => Some(Recording),
            (Recording, End) => Some(Recorded),
            (Idle | Recorded, Run) => Some(Submitted),
            (Submitted, Wait) => Some(Idle),
            (s, Wait) => Some(s),
            (Submitted, Reset) => None,
            (_, Reset) => Some(Idle),
            _ => None,
        }
    }
}

fn refused(op: CommandOp, state: CommandState) -> GPUError {
    tracing::debug!(?op, ?state, "command operation refused");
    match op {
        CommandOp::Begin => GPUError::InvalidArgument("begin requires an idle or recorded command"),
        CommandOp::Record => GPUError::InvalidArgument("record requires a recording command"),
        CommandOp::End => GPUError::InvalidArgument("end requires a recording command"),
        CommandOp::Run => GPUError::InvalidArgument("run requires an idle or recorded command"),
        CommandOp::Wait => GPUError::InvalidArgument("wait is always allowed"),
        CommandOp::Reset => GPUError::InvalidArgument("cannot reset a submitted command"),
    }
}

/// One command buffer bound to one hardware queue of the context, with the
/// fence that tracks its latest submission.
///
/// Creating a command takes the lowest free queue slot; dropping it gives the
/// slot back. Primary commands are run directly, secondary commands are
/// recorded once and replayed inside a primary with [`RecordMode::Nested`].
pub struct CommandQueue<'a> {
    ctx: &'a Context,
    debug_name: String,
    slot: u32,
    queue: vk::Queue,
    cmd_buf: vk::CommandBuffer,
    fence: vk::Fence,
    state: CommandState,
    is_secondary: bool,
    has_recording: bool,
}

impl<'a> std::fmt::Debug for CommandQueue<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("debug_name", &self.debug_name)
            .field("slot", &self.slot)
            .field("state", &self.state)
            .field("is_secondary", &self.is_secondary)
            .finish()
    }
}

impl<'a> CommandQueue<'a> {
    /// Take a queue slot, create an unsignaled fence and allocate a primary or
    /// secondary command buffer.
    ///
    /// Fails with [`GPUError::QueuesExhausted`] when every queue of the family
    /// is held by another command.
    pub fn new(ctx: &'a Context, info: &CommandInfo) -> Result<Self> {
        Self::create(ctx, info).map_err(|err| ctx.report(err))
    }

    fn create(ctx: &'a Context, info: &CommandInfo) -> Result<Self> {
        let slot = ctx
            .slots
            .borrow_mut()
            .acquire()
            .ok_or(GPUError::QueuesExhausted(ctx.queue_count))?;

        // From here on `Drop` gives the slot back on failure.
        let mut cmd = CommandQueue {
            ctx,
            debug_name: info.debug_name.to_string(),
            slot,
            queue: ctx.queue(slot),
            cmd_buf: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            state: CommandState::Idle,
            is_secondary: info.is_secondary,
            has_recording: false,
        };

        cmd.fence = unsafe {
            ctx.device
                .create_fence(&vk::FenceCreateInfo::builder().build(), None)
        }
        .creating("fence")?;
        cmd.cmd_buf = ctx.pool().alloc(info.is_secondary)?;

        ctx.set_name(cmd.fence, info.debug_name, vk::ObjectType::FENCE);
        ctx.set_name(cmd.cmd_buf, info.debug_name, vk::ObjectType::COMMAND_BUFFER);

        tracing::debug!(
            command = info.debug_name,
            slot,
            secondary = info.is_secondary,
            "created command"
        );
        Ok(cmd)
    }

    fn check(&self, op: CommandOp) -> Result<CommandState> {
        self.state
            .after(op)
            .ok_or_else(|| self.ctx.report(refused(op, self.state)))
    }

    fn transition(&mut self, next: CommandState) {
        if next != self.state {
            tracing::debug!(
                command = self.debug_name.as_str(),
                from = ?self.state,
                to = ?next,
                "command state"
            );
        }
        self.state = next;
    }

    /// Start recording. Any previous recording is discarded.
    pub fn begin(&mut self) -> Result<()> {
        let next = self.check(CommandOp::Begin)?;

        let inheritance = vk::CommandBufferInheritanceInfo::builder().build();
        let mut begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
        if self.is_secondary {
            begin_info = begin_info.inheritance_info(&inheritance);
        }

        unsafe {
            self.ctx
                .device
                .begin_command_buffer(self.cmd_buf, &begin_info.build())
        }
        .internal("vkBeginCommandBuffer")
        .map_err(|err| self.ctx.report(err))?;

        self.has_recording = false;
        self.transition(next);
        Ok(())
    }

    /// Append a pipeline dispatch or a nested secondary command.
    ///
    /// Dispatch binds the pipeline and its descriptor set, pushes the current
    /// value of every push constant and dispatches `(dispatch_count, 1, 1)`.
    /// Borrowed constants are read here, so later edits only affect later
    /// recordings.
    ///
    /// The recorded pipeline or secondary command stays borrowed for the rest
    /// of this command's life. It cannot be dropped, re-begun or reset while
    /// this command could still replay it:
    ///
    /// ```compile_fail
    /// use dashi_compute::*;
    ///
    /// fn stale<'a>(ctx: &'a Context, info: &ComputePipelineInfo<'_, 'a>) -> Result<()> {
    ///     let pipeline = ComputePipeline::new(ctx, info)?;
    ///     let mut cmd = CommandQueue::new(ctx, &CommandInfo::default())?;
    ///     cmd.begin()?;
    ///     cmd.record(&RecordInfo::dispatch(&pipeline))?;
    ///     cmd.end()?;
    ///     drop(pipeline);
    ///     cmd.run()
    /// }
    /// ```
    ///
    /// ```compile_fail
    /// use dashi_compute::*;
    ///
    /// fn stale(ctx: &Context) -> Result<()> {
    ///     let inner = CommandInfo {
    ///         debug_name: "inner",
    ///         is_secondary: true,
    ///     };
    ///     let mut secondary = CommandQueue::new(ctx, &inner)?;
    ///     secondary.begin()?;
    ///     secondary.end()?;
    ///     let mut cmd = CommandQueue::new(ctx, &CommandInfo::default())?;
    ///     cmd.begin()?;
    ///     cmd.record(&RecordInfo::nested(&secondary))?;
    ///     cmd.end()?;
    ///     secondary.reset()?;
    ///     cmd.run()
    /// }
    /// ```
    pub fn record(&mut self, info: &RecordInfo<'a>) -> Result<()> {
        if info.pipeline.is_none() && info.command.is_none() {
            return Err(self
                .ctx
                .report(GPUError::NullArgument("record info has neither a pipeline nor a command")));
        }
        let next = self.check(CommandOp::Record)?;

        match info.mode {
            RecordMode::Nested => {
                let nested = info.command.ok_or_else(|| {
                    self.ctx
                        .report(GPUError::InvalidArgument("nested record without a command"))
                })?;
                self.record_nested(nested)?;
            }
            RecordMode::Dispatch => {
                let pipeline = info.pipeline.ok_or_else(|| {
                    self.ctx
                        .report(GPUError::InvalidArgument("dispatch record without a pipeline"))
                })?;
                self.record_dispatch(pipeline)?;
            }
        }

        self.transition(next);
        Ok(())
    }

    fn record_nested(&mut self, nested: &CommandQueue) -> Result<()> {
        let err = if self.is_secondary {
            Some("only a primary command can execute nested commands")
        } else if !nested.is_secondary {
            Some("nested command must be secondary")
        } else if nested.state != CommandState::Recorded {
            Some("nested command must be recorded")
        } else if !std::ptr::eq(nested.ctx, self.ctx) {
            Some("nested command belongs to another context")
        } else {
            None
        };
        if let Some(msg) = err {
            return Err(self.ctx.report(GPUError::InvalidArgument(msg)));
        }

        unsafe {
            self.ctx
                .device
                .cmd_execute_commands(self.cmd_buf, &[nested.cmd_buf]);
        }
        Ok(())
    }

    fn record_dispatch(&mut self, pipeline: &super::ComputePipeline) -> Result<()> {
        if !std::ptr::eq(pipeline.context(), self.ctx) {
            return Err(self.ctx.report(GPUError::InvalidArgument(
                "pipeline belongs to another context",
            )));
        }

        let device = &self.ctx.device;
        unsafe {
            device.cmd_bind_pipeline(self.cmd_buf, vk::PipelineBindPoint::COMPUTE, pipeline.raw());
            device.cmd_bind_descriptor_sets(
                self.cmd_buf,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.layout(),
                0,
                &[pipeline.descriptor_set()],
                &[],
            );
            for constant in pipeline.push_constants().iter() {
                device.cmd_push_constants(
                    self.cmd_buf,
                    pipeline.layout(),
                    vk::ShaderStageFlags::COMPUTE,
                    constant.offset(),
                    &constant.bytes(),
                );
            }
            device.cmd_dispatch(self.cmd_buf, pipeline.dispatch_count(), 1, 1);
        }
        Ok(())
    }

    /// Finish recording.
    pub fn end(&mut self) -> Result<()> {
        let next = self.check(CommandOp::End)?;
        unsafe { self.ctx.device.end_command_buffer(self.cmd_buf) }
            .internal("vkEndCommandBuffer")
            .map_err(|err| self.ctx.report(err))?;
        self.has_recording = true;
        self.transition(next);
        Ok(())
    }

    /// Submit the recorded commands to this command's queue, signaling its
    /// fence on completion.
    ///
    /// A command with nothing recorded submits an empty batch so the fence
    /// still signals and a later [`Self::wait`] returns.
    pub fn run(&mut self) -> Result<()> {
        if self.is_secondary {
            return Err(self.ctx.report(GPUError::InvalidArgument(
                "secondary commands run only when nested in a primary",
            )));
        }
        let next = self.check(CommandOp::Run)?;

        let buffers = [self.cmd_buf];
        let submit = if self.has_recording {
            vk::SubmitInfo::builder().command_buffers(&buffers).build()
        } else {
            tracing::warn!(
                command = self.debug_name.as_str(),
                "running a command with nothing recorded"
            );
            vk::SubmitInfo::builder().build()
        };

        unsafe {
            self.ctx
                .device
                .queue_submit(self.queue, &[submit], self.fence)
        }
        .internal("vkQueueSubmit")
        .map_err(|err| self.ctx.report(err))?;

        self.transition(next);
        Ok(())
    }

    /// Block until the outstanding submission finishes, then reset the fence.
    ///
    /// Returns immediately when nothing is outstanding. The fence is reset and
    /// the command returns to [`CommandState::Idle`] even if the wait failed.
    pub fn wait(&mut self) -> Result<()> {
        if self.state != CommandState::Submitted {
            return Ok(());
        }
        let next = self.check(CommandOp::Wait)?;

        let ctx = self.ctx;
        let device = &ctx.device;
        let waited = unsafe { device.wait_for_fences(&[self.fence], true, u64::MAX) };
        let reset = unsafe { device.reset_fences(&[self.fence]) };
        self.transition(next);

        match waited {
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(ctx.report(GPUError::DeviceLost)),
            Err(res) => Err(ctx.report(GPUError::vulkan("vkWaitForFences", res))),
            Ok(()) => reset
                .internal("vkResetFences")
                .map_err(|err| ctx.report(err)),
        }
    }

    /// Discard the recording and return to [`CommandState::Idle`]. The buffer
    /// itself is kept for reuse.
    pub fn reset(&mut self) -> Result<()> {
        let next = self.check(CommandOp::Reset)?;
        self.ctx
            .pool()
            .reset(self.cmd_buf, false)
            .map_err(|err| self.ctx.report(err))?;
        self.has_recording = false;
        self.transition(next);
        Ok(())
    }

    /// Queue slot held by this command.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn is_secondary(&self) -> bool {
        self.is_secondary
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.cmd_buf
    }

    /// Release the slot, command buffer and fence.
    ///
    /// An outstanding submission is waited on first.
    pub fn destroy(self) {
        drop(self);
    }
}

impl<'a> Drop for CommandQueue<'a> {
    fn drop(&mut self) {
        let ctx = self.ctx;
        let device = &ctx.device;
        if self.state == CommandState::Submitted {
            if let Err(res) = unsafe { device.wait_for_fences(&[self.fence], true, u64::MAX) } {
                tracing::warn!(
                    command = self.debug_name.as_str(),
                    result = %res,
                    "wait before destroying a submitted command failed"
                );
            }
        }

        self.ctx.slots.borrow_mut().mark_free(self.slot);

        if self.cmd_buf != vk::CommandBuffer::null() {
            if let Err(err) = self.ctx.pool().reset(self.cmd_buf, true) {
                tracing::warn!(command = self.debug_name.as_str(), "{}", err);
            }
            self.ctx.pool().free(self.cmd_buf);
        }
        if self.fence != vk::Fence::null() {
            unsafe { device.destroy_fence(self.fence, None) };
        }
        tracing::debug!(command = self.debug_name.as_str(), slot = self.slot, "destroyed command");
    }
}
