//! Assembly interrupt stubs.
//!
//! Every vector gets a tiny entry stub that normalizes the stack (vectors
//! without a CPU error code push a dummy 0), records the vector number,
//! and jumps to the common save path. The common path pushes the general
//! registers and data segment selectors to complete a `RegisterFrame`,
//! calls `interrupt_dispatch`, then switches RSP to whatever frame the
//! dispatcher returned before restoring and `iretq`. That RSP switch is
//! the entire context-switch mechanism.
//!
//! FS/GS are captured for diagnostics but not reloaded on exit: their
//! bases live in MSRs and a selector load would wipe them.

use core::arch::global_asm;

macro_rules! vector_stub {
    ($name:ident, $vector:expr) => {
        global_asm!(
            concat!(
                ".section .text\n",
                ".global ", stringify!($name), "\n",
                ".type ", stringify!($name), ", @function\n",
                stringify!($name), ":\n",
                "    push 0\n",
                "    push {vector}\n",
                "    jmp interrupt_common\n",
            ),
            vector = const $vector,
        );
    };
}

macro_rules! vector_stub_err {
    ($name:ident, $vector:expr) => {
        global_asm!(
            concat!(
                ".section .text\n",
                ".global ", stringify!($name), "\n",
                ".type ", stringify!($name), ", @function\n",
                stringify!($name), ":\n",
                "    push {vector}\n",
                "    jmp interrupt_common\n",
            ),
            vector = const $vector,
        );
    };
}

global_asm!(
    r#"
    .section .text
    .global interrupt_common
    .type interrupt_common, @function
interrupt_common:
    push rax
    push rcx
    push rdx
    push rbx
    push rbp
    push rsi
    push rdi
    push r8
    push r9
    push r10
    push r11
    push r12
    push r13
    push r14
    push r15
    mov rax, ds
    push rax
    mov rax, es
    push rax
    mov rax, fs
    push rax
    mov rax, gs
    push rax

    mov rdi, rsp
    and rsp, -16
    call interrupt_dispatch

    mov rsp, rax
    add rsp, 16
    pop rax
    mov es, ax
    pop rax
    mov ds, ax
    pop r15
    pop r14
    pop r13
    pop r12
    pop r11
    pop r10
    pop r9
    pop r8
    pop rdi
    pop rsi
    pop rbp
    pop rbx
    pop rdx
    pop rcx
    pop rax
    add rsp, 16
    iretq
"#,
);

// CPU exceptions. Vectors 8, 10-14, 17 and 30 push a hardware error code;
// the rest get a dummy 0 so every frame has the same shape.
vector_stub!(vector_0, 0);
vector_stub!(vector_1, 1);
vector_stub!(vector_2, 2);
vector_stub!(vector_3, 3);
vector_stub!(vector_4, 4);
vector_stub!(vector_5, 5);
vector_stub!(vector_6, 6);
vector_stub!(vector_7, 7);
vector_stub_err!(vector_8, 8);
vector_stub!(vector_9, 9);
vector_stub_err!(vector_10, 10);
vector_stub_err!(vector_11, 11);
vector_stub_err!(vector_12, 12);
vector_stub_err!(vector_13, 13);
vector_stub_err!(vector_14, 14);
vector_stub!(vector_15, 15);
vector_stub!(vector_16, 16);
vector_stub_err!(vector_17, 17);
vector_stub!(vector_18, 18);
vector_stub!(vector_19, 19);
vector_stub!(vector_20, 20);
vector_stub!(vector_21, 21);
vector_stub!(vector_22, 22);
vector_stub!(vector_23, 23);
vector_stub!(vector_24, 24);
vector_stub!(vector_25, 25);
vector_stub!(vector_26, 26);
vector_stub!(vector_27, 27);
vector_stub!(vector_28, 28);
vector_stub!(vector_29, 29);
vector_stub_err!(vector_30, 30);
vector_stub!(vector_31, 31);

// Remapped PIC IRQs 0-15.
vector_stub!(vector_32, 32);
vector_stub!(vector_33, 33);
vector_stub!(vector_34, 34);
vector_stub!(vector_35, 35);
vector_stub!(vector_36, 36);
vector_stub!(vector_37, 37);
vector_stub!(vector_38, 38);
vector_stub!(vector_39, 39);
vector_stub!(vector_40, 40);
vector_stub!(vector_41, 41);
vector_stub!(vector_42, 42);
vector_stub!(vector_43, 43);
vector_stub!(vector_44, 44);
vector_stub!(vector_45, 45);
vector_stub!(vector_46, 46);
vector_stub!(vector_47, 47);

extern "C" {
    fn vector_0();
    fn vector_1();
    fn vector_2();
    fn vector_3();
    fn vector_4();
    fn vector_5();
    fn vector_6();
    fn vector_7();
    fn vector_8();
    fn vector_9();
    fn vector_10();
    fn vector_11();
    fn vector_12();
    fn vector_13();
    fn vector_14();
    fn vector_15();
    fn vector_16();
    fn vector_17();
    fn vector_18();
    fn vector_19();
    fn vector_20();
    fn vector_21();
    fn vector_22();
    fn vector_23();
    fn vector_24();
    fn vector_25();
    fn vector_26();
    fn vector_27();
    fn vector_28();
    fn vector_29();
    fn vector_30();
    fn vector_31();
    fn vector_32();
    fn vector_33();
    fn vector_34();
    fn vector_35();
    fn vector_36();
    fn vector_37();
    fn vector_38();
    fn vector_39();
    fn vector_40();
    fn vector_41();
    fn vector_42();
    fn vector_43();
    fn vector_44();
    fn vector_45();
    fn vector_46();
    fn vector_47();
}

/// Entry stubs for vectors 0-47, indexed by vector number. Consumed by
/// the IDT population code, which only exists on the bare-metal target.
#[cfg_attr(not(target_os = "none"), allow(dead_code))]
pub static VECTOR_STUBS: [unsafe extern "C" fn(); 48] = [
    vector_0, vector_1, vector_2, vector_3, vector_4, vector_5, vector_6, vector_7, vector_8,
    vector_9, vector_10, vector_11, vector_12, vector_13, vector_14, vector_15, vector_16,
    vector_17, vector_18, vector_19, vector_20, vector_21, vector_22, vector_23, vector_24,
    vector_25, vector_26, vector_27, vector_28, vector_29, vector_30, vector_31, vector_32,
    vector_33, vector_34, vector_35, vector_36, vector_37, vector_38, vector_39, vector_40,
    vector_41, vector_42, vector_43, vector_44, vector_45, vector_46, vector_47,
];
