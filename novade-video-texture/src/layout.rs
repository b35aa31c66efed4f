//! The image layout state machine.
//!
//! Every [`GpuImage`](crate::texture::GpuImage) carries an [`ImageLayoutState`]
//! tag. A transition request is checked against the legal pairs and yields
//! the barrier masks for it; anything else is a programming error and panics.

use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayoutState {
    Undefined,
    TransferDst,
    ShaderReadOnly,
}

impl ImageLayoutState {
    pub fn vk_layout(self) -> vk::ImageLayout {
        match self {
            ImageLayoutState::Undefined => vk::ImageLayout::UNDEFINED,
            ImageLayoutState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageLayoutState::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

/// Access and stage masks for one legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionBarrier {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
    pub src_stage_mask: vk::PipelineStageFlags,
    pub dst_stage_mask: vk::PipelineStageFlags,
}

impl TransitionBarrier {
    /// Builds the image memory barrier for the whole color subresource of `image`.
    pub fn image_barrier(&self, image: vk::Image) -> vk::ImageMemoryBarrier {
        vk::ImageMemoryBarrier::builder()
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(self.src_access_mask)
            .dst_access_mask(self.dst_access_mask)
            .build()
    }
}

/// Returns the barrier for `from -> to`, or `None` if the pair is not legal.
pub fn transition_barrier(from: ImageLayoutState, to: ImageLayoutState) -> Option<TransitionBarrier> {
    use ImageLayoutState::*;

    let (src_access_mask, dst_access_mask, src_stage_mask, dst_stage_mask) = match (from, to) {
        (Undefined, TransferDst) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (TransferDst, ShaderReadOnly) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        // Video refresh: the previous frame's draw must finish sampling before the copy.
        (ShaderReadOnly, TransferDst) => (
            vk::AccessFlags::SHADER_READ,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::PipelineStageFlags::TRANSFER,
        ),
        _ => return None,
    };

    Some(TransitionBarrier {
        old_layout: from.vk_layout(),
        new_layout: to.vk_layout(),
        src_access_mask,
        dst_access_mask,
        src_stage_mask,
        dst_stage_mask,
    })
}

/// Like [`transition_barrier`], but panics on an illegal pair.
pub fn require_transition(from: ImageLayoutState, to: ImageLayoutState) -> TransitionBarrier {
    match transition_barrier(from, to) {
        Some(barrier) => barrier,
        None => panic!("unsupported image layout transition: {:?} -> {:?}", from, to),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ImageLayoutState::*;

    #[test]
    fn legal_transitions_carry_expected_masks() {
        let first = require_transition(Undefined, TransferDst);
        assert_eq!(first.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(first.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert!(first.src_access_mask.is_empty());
        assert_eq!(first.dst_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(first.src_stage_mask, vk::PipelineStageFlags::TOP_OF_PIPE);

        let second = require_transition(TransferDst, ShaderReadOnly);
        assert_eq!(second.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(second.dst_access_mask, vk::AccessFlags::SHADER_READ);
        assert_eq!(second.dst_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);

        let refresh = require_transition(ShaderReadOnly, TransferDst);
        assert_eq!(refresh.old_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(refresh.src_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(refresh.dst_stage_mask, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn only_three_pairs_are_legal() {
        let states = [Undefined, TransferDst, ShaderReadOnly];
        let legal: Vec<_> = states
            .iter()
            .flat_map(|&from| states.iter().map(move |&to| (from, to)))
            .filter(|&(from, to)| transition_barrier(from, to).is_some())
            .collect();
        assert_eq!(
            legal,
            vec![(Undefined, TransferDst), (TransferDst, ShaderReadOnly), (ShaderReadOnly, TransferDst)]
        );
    }

    #[test]
    #[should_panic(expected = "unsupported image layout transition")]
    fn shader_read_to_shader_read_panics() {
        require_transition(ShaderReadOnly, ShaderReadOnly);
    }

    #[test]
    #[should_panic(expected = "unsupported image layout transition")]
    fn undefined_to_shader_read_panics() {
        require_transition(Undefined, ShaderReadOnly);
    }

    #[test]
    fn barrier_covers_single_color_subresource() {
        let barrier = require_transition(Undefined, TransferDst).image_barrier(vk::Image::null());
        assert_eq!(barrier.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(barrier.subresource_range.level_count, 1);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }
}
