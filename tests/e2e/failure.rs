use crate::e2e::*;

#[test]
fn failing_recipe() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out:\n\techo oops; exit 3\n\ttouch out\n")?;
    let out = space.run(&mut mason_command(vec![]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "oops\nfailed: out (exit status 3)");
    assert_output_not_contains(&out, "now up to date");
    assert!(space.read("out").is_err());
    Ok(())
}

const PAIR: &str = "
all: x y
x:
\ttest -f ok && touch x
y:
\ttouch y
";

#[test]
fn fail_fast() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", PAIR)?;
    let out = space.run(&mut mason_command(vec!["-j", "1"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "failed: x");
    assert!(space.read("y").is_err());
    Ok(())
}

#[test]
fn keep_going() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", PAIR)?;
    let out = space.run(&mut mason_command(vec!["-j", "1", "-k"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "failed: x");
    assert!(space.read("y").is_ok());

    // Only the failed task runs again.
    space.write("ok", "")?;
    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "ran 1 tasks");
    assert!(space.read("x").is_ok());
    Ok(())
}

#[test]
fn failure_poisons_dependents() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "Makefile",
        "
top: mid
\ttouch top
mid:
\ttest -f ok && touch mid
",
    )?;
    let out = space.run(&mut mason_command(vec!["-k"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_not_contains(&out, "top");
    assert!(space.read("top").is_err());

    space.write("ok", "")?;
    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "ran 2 tasks");
    Ok(())
}

#[test]
fn ignored_errors() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out:\n\t-exit 2\n\ttouch out\n")?;
    let out = space.run_expect(&mut mason_command(vec![]))?;
    assert_output_contains(&out, "(ignored exit status 2)");
    assert!(space.read("out").is_ok());
    Ok(())
}

#[test]
fn cycle() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "a: b\n\ttouch a\nb: a\n\ttouch b\n")?;
    let out = space.run(&mut mason_command(vec![]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "dependency cycle: a -> b -> a");
    Ok(())
}

#[test]
fn two_recipes_for_one_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out:\n\ttouch out\nout:\n\ttouch out again\n")?;
    let out = space.run(&mut mason_command(vec![]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "Makefile:3");
    assert_output_contains(&out, "more than one task");
    Ok(())
}
