// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! C header for [super].

/// The C declarations of every exported function.
pub fn c_header() -> String {
    let header = r#"#ifndef KERNELS_AND_QUEUES_H
#define KERNELS_AND_QUEUES_H
#include <stdint.h>
#ifdef __cplusplus
extern "C" {
#endif

/* Opaque handles. 0 is null. */
typedef uint64_t KqDevice;
typedef uint64_t KqCommandQueue;
typedef uint64_t KqBuffer;
typedef uint64_t KqLibrary;
typedef uint64_t KqFunction;
typedef uint64_t KqPipeline;
typedef uint64_t KqCommandBuffer;
typedef uint64_t KqEncoder;

typedef enum {
    KQ_STORAGE_MODE_SHARED = 0,
    KQ_STORAGE_MODE_MANAGED = 1,
    KQ_STORAGE_MODE_PRIVATE = 2,
    KQ_STORAGE_MODE_MEMORYLESS = 3
} KqStorageMode;

typedef enum {
    KQ_STATUS_NOT_COMMITTED = 0,
    KQ_STATUS_COMMITTED = 1,
    KQ_STATUS_SCHEDULED = 2,
    KQ_STATUS_COMPLETED = 3,
    KQ_STATUS_ERROR = 4
} KqStatus;

typedef void (*KqCompletionCallback)(void* context, uint32_t status);

int kq_init(void);
void kq_cleanup(void);

KqDevice kq_create_default_device(void);
char* kq_device_name(KqDevice device);
uint32_t kq_device_max_threads_per_threadgroup(KqDevice device);
uint64_t kq_device_min_buffer_offset_alignment(KqDevice device);
void kq_device_release(KqDevice device);

KqCommandQueue kq_device_create_command_queue(KqDevice device);
void kq_command_queue_release(KqCommandQueue queue);

KqBuffer kq_device_create_buffer(KqDevice device, uint64_t length, uint32_t storage_mode);
void* kq_buffer_contents(KqBuffer buffer);
uint64_t kq_buffer_length(KqBuffer buffer);
void kq_buffer_did_modify_range(KqBuffer buffer, uint64_t start, uint64_t length);
void kq_buffer_release(KqBuffer buffer);

KqLibrary kq_device_create_library(KqDevice device, const char* source, char** error_out);
KqFunction kq_library_function(KqLibrary library, const char* name);
void kq_library_release(KqLibrary library);
char* kq_function_name(KqFunction function);
void kq_function_release(KqFunction function);

KqPipeline kq_device_create_compute_pipeline(KqDevice device, KqFunction function, char** error_out);
uint32_t kq_pipeline_max_total_threads_per_threadgroup(KqPipeline pipeline);
void kq_pipeline_release(KqPipeline pipeline);

KqCommandBuffer kq_command_queue_command_buffer(KqCommandQueue queue);
KqEncoder kq_command_buffer_compute_encoder(KqCommandBuffer command_buffer);
void kq_encoder_set_pipeline(KqEncoder encoder, KqPipeline pipeline);
/* offset must be a multiple of kq_device_min_buffer_offset_alignment */
void kq_encoder_set_buffer(KqEncoder encoder, KqBuffer buffer, uint64_t offset, uint32_t index);
void kq_encoder_set_bytes(KqEncoder encoder, const void* bytes, uint64_t length, uint32_t index);
void kq_encoder_dispatch(KqEncoder encoder, uint32_t width, uint32_t height, uint32_t depth);
void kq_encoder_dispatch_threadgroups(KqEncoder encoder, uint32_t x, uint32_t y, uint32_t z);
void kq_encoder_end_encoding(KqEncoder encoder);
void kq_encoder_release(KqEncoder encoder);

void kq_command_buffer_commit(KqCommandBuffer command_buffer);
void kq_command_buffer_commit_with_callback(KqCommandBuffer command_buffer, KqCompletionCallback callback, void* context);
uint32_t kq_command_buffer_wait_until_completed(KqCommandBuffer command_buffer);
uint32_t kq_command_buffer_status(KqCommandBuffer command_buffer);
void kq_command_buffer_release(KqCommandBuffer command_buffer);

void kq_string_free(char* s);

#ifdef __cplusplus
} // extern "C"
#endif
#endif
"#;
    header.to_string()
}
