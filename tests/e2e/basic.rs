use crate::e2e::*;

#[test]
fn empty_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "")?;
    let out = space.run(&mut mason_command(vec![]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "mason: error: no target specified and no default");
    Ok(())
}

#[test]
fn basic_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out: in\n\tcp in out\n")?;
    space.write("in", "hello")?;
    let out = space.run_expect(&mut mason_command(vec!["out"]))?;
    assert_output_contains(&out, "[1/1] out");
    assert_output_contains(&out, "mason: ran 1 tasks, now up to date");
    assert_eq!(space.read_string("out")?, "hello");
    assert!(space.metadata(".mason.db").is_ok());

    let out = space.run_expect(&mut mason_command(vec!["out"]))?;
    assert_output_contains(&out, "mason: no work to do");
    Ok(())
}

#[test]
fn default_is_first_rule() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "Makefile",
        "
all: a b

a:
\techo a > a
b:
\techo b > b
other:
\techo other > other
",
    )?;
    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "ran 2 tasks");
    assert!(space.read("a").is_ok());
    assert!(space.read("b").is_ok());
    assert!(space.read("other").is_err());
    Ok(())
}

#[test]
fn automatic_variables_and_macros() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "Makefile",
        "
CAT = cat
SEP := -
joined: one two
\t$(CAT) $^ > $@
\techo '$(SEP)' >> ${TARGET}
\techo $< >> $@
",
    )?;
    space.write("one", "1\n")?;
    space.write("two", "2\n")?;
    space.run_expect(&mut mason_command(vec!["joined"]))?;
    assert_eq!(space.read_string("joined")?, "1\n2\n-\none\n");
    Ok(())
}

#[test]
fn verbose_prints_commands() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out: in\n\t@cp $< $@\n")?;
    space.write("in", "")?;
    let out = space.run_expect(&mut mason_command(vec!["-v", "out"]))?;
    assert_output_contains(&out, "[1/1] out\ncp in out\n");

    space.modify("in", "changed")?;
    let out = space.run_expect(&mut mason_command(vec!["out"]))?;
    assert_output_not_contains(&out, "cp in out");
    Ok(())
}

#[test]
fn unknown_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out:\n\ttouch out\n")?;
    let out = space.run(&mut mason_command(vec!["nope"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "unknown target \"nope\"");
    assert!(space.read("out").is_err());
    Ok(())
}

#[test]
fn phony_always_runs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "Makefile",
        "
.PHONY: hello
hello: in
\t@echo hi from $@
",
    )?;
    space.write("in", "")?;
    for _ in 0..2 {
        let out = space.run_expect(&mut mason_command(vec!["hello"]))?;
        assert_output_contains(&out, "hi from hello\n");
        assert_output_contains(&out, "ran 1 tasks");
    }
    // Not a file, despite the name.
    assert!(space.read("hello").is_err());
    Ok(())
}

#[test]
fn chdir_and_makefile_name() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    std::fs::create_dir(space.path().join("sub"))?;
    space.write("sub/rules.mk", "out:\n\ttouch out\n")?;
    space.run_expect(&mut mason_command(vec!["-C", "sub", "-f", "rules.mk"]))?;
    assert!(space.read("sub/out").is_ok());
    assert!(space.read("sub/.mason.db").is_ok());
    Ok(())
}

#[test]
fn grouped_targets_run_once() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "Makefile",
        "
all: gen.c gen.h
gen.c gen.h &: spec
\techo run >> log
\ttouch gen.c gen.h
",
    )?;
    space.write("spec", "")?;
    space.run_expect(&mut mason_command(vec![]))?;
    assert_eq!(space.read_string("log")?, "run\n");
    Ok(())
}

#[test]
fn parse_error_has_location() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out:\n\ttouch out\ninclude other.mk\n")?;
    let out = space.run(&mut mason_command(vec![]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "Makefile:3:");
    Ok(())
}
