//! Device tests. They need a Vulkan driver and are ignored by default:
//! `cargo test -p ashlar-gpu -- --ignored`.

use ash::vk;
use ashlar_gpu::command::execute_single_time_commands;
use ashlar_gpu::descriptors::write_storage_image;
use ashlar_gpu::{
    capture_attachment, BufferObject, ComputeBuffer, ComputeBufferDesc, ComputePipeline, DescriptorSetLayoutBuilder,
    FrameBuffer, FrameBufferDesc, GpuContext, GpuContextBuilder, GpuError, MemoryUsage, ShaderModule,
};
use std::sync::Arc;

fn context() -> Arc<GpuContext> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    GpuContextBuilder::new()
        .app_name("ashlar-gpu-tests")
        .validation(true)
        .build()
        .expect("a Vulkan device")
}

#[test]
#[ignore = "needs a Vulkan device"]
fn cleared_frame_buffer_captures_clear_color() {
    let ctx = context();
    let desc = FrameBufferDesc::new(256, 256)
        .with_format(vk::Format::R8G8B8A8_UNORM)
        .with_clear(Some([1.0, 0.0, 0.0, 1.0]));
    let mut frame_buffer = FrameBuffer::new(&ctx, desc, None).unwrap();
    assert_eq!(frame_buffer.extent(), vk::Extent2D { width: 256, height: 256 });

    unsafe {
        execute_single_time_commands(&ctx, |cmd| {
            frame_buffer.begin(cmd);
            frame_buffer.end(cmd);
        })
        .unwrap();
    }

    let output = frame_buffer.back().output(0).unwrap();
    let captured = capture_attachment(&ctx, output).unwrap();
    assert_eq!((captured.width, captured.height), (256, 256));
    assert_eq!(captured.rgba.len(), 256 * 256 * 4);
    assert!(captured.rgba.chunks_exact(4).all(|p| p == [255, 0, 0, 255]));
}

#[test]
#[ignore = "needs a Vulkan device"]
fn mipped_frame_buffer_renders_level_zero() {
    let ctx = context();
    let desc = FrameBufferDesc::new(64, 64)
        .with_mip_levels(4)
        .with_clear(Some([0.0, 0.0, 1.0, 1.0]));
    let mut frame_buffer = FrameBuffer::new(&ctx, desc, None).unwrap();
    let output = frame_buffer.front().output(0).unwrap();
    assert_eq!(output.image().mip_levels(), 4);
    assert_ne!(output.render_view(), output.view());

    unsafe {
        execute_single_time_commands(&ctx, |cmd| {
            frame_buffer.begin(cmd);
            frame_buffer.end(cmd);
        })
        .unwrap();
    }

    let captured = capture_attachment(&ctx, frame_buffer.back().output(0).unwrap()).unwrap();
    assert!(captured.rgba.chunks_exact(4).all(|p| p == [0, 0, 255, 255]));
}

#[test]
#[ignore = "needs a Vulkan device"]
fn ping_pong_alternates_buffers() {
    let ctx = context();
    let desc = FrameBufferDesc::new(64, 64).with_ping_pong(true);
    let mut frame_buffer = FrameBuffer::new(&ctx, desc, None).unwrap();
    assert_eq!(frame_buffer.buffers().len(), 2);

    let first = frame_buffer.front().framebuffer();
    let sampled = frame_buffer.back().views();
    unsafe {
        execute_single_time_commands(&ctx, |cmd| {
            frame_buffer.begin_with_inputs(cmd, &sampled).unwrap();
            frame_buffer.end(cmd);
        })
        .unwrap();
    }
    assert_eq!(frame_buffer.back().framebuffer(), first);
    assert_ne!(frame_buffer.front().framebuffer(), first);
}

#[test]
#[ignore = "needs a Vulkan device"]
fn sampling_the_front_buffer_is_rejected() {
    let ctx = context();
    let frame_buffer = FrameBuffer::new(&ctx, FrameBufferDesc::new(32, 32), None).unwrap();
    let own_views = frame_buffer.front().views();

    let result = unsafe {
        let mut outcome = Ok(());
        execute_single_time_commands(&ctx, |cmd| {
            outcome = frame_buffer.begin_with_inputs(cmd, &own_views);
        })
        .unwrap();
        outcome
    };
    assert!(matches!(result, Err(GpuError::FeedbackHazard(_))));
}

#[test]
#[ignore = "needs a Vulkan device"]
fn resize_rebuilds_attachments() {
    let ctx = context();
    let mut frame_buffer = FrameBuffer::new(&ctx, FrameBufferDesc::new(128, 128), None).unwrap();
    assert!(!frame_buffer.resize_if_needed().unwrap());

    frame_buffer.need_resize(300, 200, Some(2));
    assert!(frame_buffer.resize_if_needed().unwrap());
    assert_eq!(frame_buffer.extent(), vk::Extent2D { width: 300, height: 200 });
    assert_eq!(frame_buffer.front().color_attachments().len(), 2);
}

#[test]
#[ignore = "needs a Vulkan device"]
fn buffer_contents_survive_staging() {
    let ctx = context();
    let data: Vec<u32> = (0..1024).collect();
    let gpu = BufferObject::with_data(
        &ctx,
        bytemuck::cast_slice(&data),
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryUsage::GpuOnly,
        "test data",
    )
    .unwrap();
    assert!(matches!(gpu.download(0, 4), Err(GpuError::NotHostVisible)));

    let readback = BufferObject::readback(&ctx, gpu.size()).unwrap();
    ashlar_gpu::buffer::copy_buffer(&ctx, &gpu, &readback, gpu.size()).unwrap();
    assert_eq!(readback.download_pod::<u32>(data.len()).unwrap(), data);
}

#[test]
#[ignore = "needs a Vulkan device"]
fn compute_buffer_swaps_target_sets() {
    let ctx = context();
    let device = ctx.device();
    let mut compute = ComputeBuffer::new(&ctx, ComputeBufferDesc::new(64, 64).with_count(2).with_ping_pong(true)).unwrap();
    assert_eq!(compute.front().len(), 2);
    let written = compute.front()[0].view();
    assert!(compute.check_inputs(&[written]).is_err());

    let set_layout = unsafe {
        DescriptorSetLayoutBuilder::new()
            .storage_image(0, vk::ShaderStageFlags::COMPUTE)
            .build(device)
            .unwrap()
    };
    let shader = ShaderModule::new(&ctx, vk::ShaderStageFlags::COMPUTE, ashlar_shaders::fill_compute_shader()).unwrap();
    let push_range = vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::COMPUTE)
        .size(16);
    let pipeline = ComputePipeline::new(&ctx, &shader, &[set_layout], &[push_range]).unwrap();

    let sets = unsafe { ctx.descriptor_pool().allocate(device, &[set_layout]).unwrap() };
    unsafe { write_storage_image(device, sets[0], 0, compute.front()[0].storage_descriptor_info()) };

    let target = compute.front()[0].image().handle();
    let readback = BufferObject::readback(&ctx, 64 * 64 * 16).unwrap();
    let color = [0.25f32, 0.5, 0.75, 1.0];
    let [groups_x, groups_y] = compute.group_count([8, 8]);
    unsafe {
        execute_single_time_commands(&ctx, |cmd| {
            pipeline.bind(cmd, &sets);
            device.cmd_push_constants(
                cmd,
                pipeline.layout(),
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&color),
            );
            device.cmd_dispatch(cmd, groups_x, groups_y, 1);
            compute.end(cmd);

            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .layer_count(1),
                )
                .image_extent(vk::Extent3D {
                    width: 64,
                    height: 64,
                    depth: 1,
                });
            device.cmd_copy_image_to_buffer(cmd, target, vk::ImageLayout::GENERAL, readback.handle(), &[region]);
        })
        .unwrap();
    }
    assert!(compute.check_inputs(&[written]).is_ok());
    assert_eq!(compute.back()[0].view(), written);

    let texels = readback.download_pod::<[f32; 4]>(64 * 64).unwrap();
    assert!(texels.iter().all(|texel| *texel == color));

    unsafe {
        ctx.descriptor_pool().free(device, &sets).unwrap();
        device.destroy_descriptor_set_layout(set_layout, None);
    }
}
