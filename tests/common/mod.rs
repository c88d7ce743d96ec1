#![allow(dead_code)]

use ffmpeg_next::codec::encoder::video::Encoder;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::{Packet, Rational, codec, encoder, format, frame};
use std::path::Path;

pub const FPS: i32 = 10;

pub fn init_ffmpeg() {
    static FFMPEG_INIT: std::sync::Once = std::sync::Once::new();
    FFMPEG_INIT.call_once(|| {
        ffmpeg_next::init().unwrap();
    });
}

/// Encode `frames` flat gray frames into an MPEG-4 file at `FPS` frames per second.
pub fn write_test_video(
    path: &Path,
    frames: i64,
    width: u32,
    height: u32,
) -> Result<(), ffmpeg_next::Error> {
    init_ffmpeg();
    let time_base = Rational::new(1, FPS);

    let mut octx = format::output(path)?;
    let global_header = octx
        .format()
        .flags()
        .contains(format::Flags::GLOBAL_HEADER);

    let codec = encoder::find(codec::Id::MPEG4).ok_or(ffmpeg_next::Error::EncoderNotFound)?;
    let mut ost = octx.add_stream(codec)?;
    let stream_index = ost.index();

    let mut video = codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()?;
    video.set_width(width);
    video.set_height(height);
    video.set_format(Pixel::YUV420P);
    video.set_time_base(time_base);
    video.set_frame_rate(Some(Rational::new(FPS, 1)));
    if global_header {
        video.set_flags(codec::Flags::GLOBAL_HEADER);
    }
    let mut opened = video.open_as(codec)?;
    ost.set_parameters(&opened);
    ost.set_time_base(time_base);

    octx.write_header()?;
    let stream_time_base = octx
        .stream(stream_index)
        .map(|stream| stream.time_base())
        .unwrap_or(time_base);

    let mut frame = frame::Video::new(Pixel::YUV420P, width, height);
    for index in 0..frames {
        frame.data_mut(0).fill((index * 20 % 220) as u8 + 16);
        frame.data_mut(1).fill(128);
        frame.data_mut(2).fill(128);
        frame.set_pts(Some(index));
        opened.send_frame(&frame)?;
        write_packets(&mut opened, &mut octx, stream_index, time_base, stream_time_base)?;
    }

    opened.send_eof()?;
    write_packets(&mut opened, &mut octx, stream_index, time_base, stream_time_base)?;
    octx.write_trailer()
}

fn write_packets(
    encoder: &mut Encoder,
    octx: &mut format::context::Output,
    stream_index: usize,
    from: Rational,
    to: Rational,
) -> Result<(), ffmpeg_next::Error> {
    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(stream_index);
        packet.rescale_ts(from, to);
        packet.write_interleaved(octx)?;
    }
    Ok(())
}
